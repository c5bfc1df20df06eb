//! Error types for the proxy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Proxy error type.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The backend exited, or could not be spawned, before becoming ready.
    #[error("Backend failed to start: {0}")]
    StartupFailed(String),

    /// The backend was marked ready but the request could not be forwarded.
    #[error("Forwarding to backend failed: {0}")]
    Forward(#[from] reqwest::Error),

    /// The backend side of a bridged WebSocket could not be opened.
    #[error("Backend WebSocket failed: {0}")]
    Bridge(#[from] tokio_tungstenite::tungstenite::Error),

    /// The configured backend address cannot be used in HTTP headers.
    #[error("Invalid backend address: {0}")]
    InvalidBackend(String),

    /// The HTTPS certificate or key could not be loaded.
    #[error("TLS setup failed: {0}")]
    Tls(String),

    /// I/O error (binding the front door).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::StartupFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Forward(_) | Self::Bridge(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidBackend(_) | Self::Tls(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, self.to_string()).into_response()
    }
}
