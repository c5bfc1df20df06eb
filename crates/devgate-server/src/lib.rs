//! Development proxy for devgate.
//!
//! Fronts a backend build/render server during development:
//! - starts the backend on the first request and shows a streaming
//!   "starting…" page while it boots
//! - forwards HTTP once the backend answers, rewriting `Host`/`Origin`
//! - bridges WebSocket upgrades (including the live-reload channel) frame
//!   by frame
//! - stops the backend after an idle window or when it asks for a restart
//!
//! # Quick Start
//!
//! ```ignore
//! use devgate_server::{ProxyConfig, SupervisorConfig, run_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ProxyConfig {
//!         host: "127.0.0.1".to_owned(),
//!         port: 3000,
//!         backend: SupervisorConfig::from_backend(&backend_config).unwrap(),
//!         live_reload_enabled: true,
//!         tls: None,
//!     };
//!
//!     run_server(config).await.unwrap();
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Browser ──HTTP(S)/WS──► devgate proxy (devgate-server)
//!                          │
//!                          ├─► /__devgate/live-reload.js (embedded asset)
//!                          │
//!                          └─► ProcessSupervisor::ensure_started
//!                                  │
//!                                  ├─ starting ─► bootstrap page (HTML navigations)
//!                                  │
//!                                  └─ ready ────► Forwarder (HTTP)
//!                                                 bridge (WebSocket) ──► backend
//! ```

mod app;
mod bootstrap;
mod bridge;
mod error;
mod forward;
mod handlers;
mod state;
mod supervisor;
mod tls;

use std::sync::Arc;

use devgate_config::{ConfigError, TlsFiles};
use state::AppState;

pub use bootstrap::{DRAIN_INTERVAL, bootstrap_response};
pub use bridge::bridge;
pub use error::ProxyError;
pub use forward::{Forwarded, Forwarder, RELOAD_HEADER, RELOAD_RESTART};
pub use supervisor::{
    DEFAULT_PROBE_INTERVAL, PROXIED_ENV, ProcessSupervisor, StartAttempt, StartStatus, Startup,
    SupervisorConfig,
};

/// Proxy configuration.
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Backend process to supervise.
    pub backend: SupervisorConfig,
    /// Serve the browser live-reload script.
    pub live_reload_enabled: bool,
    /// Certificate and key when the front door speaks HTTPS.
    pub tls: Option<TlsFiles>,
}

/// Run the proxy until Ctrl-C, then stop the backend.
///
/// # Arguments
///
/// * `config` - Proxy configuration
///
/// # Errors
///
/// Returns an error if the HTTP clients cannot be built, the TLS files cannot
/// be loaded, or the front door cannot be bound.
pub async fn run_server(config: ProxyConfig) -> Result<(), ProxyError> {
    let rustls_config = match &config.tls {
        Some(files) => Some(tls::load(files).await?),
        None => None,
    };
    let forwarder = Forwarder::new(&config.backend.hostname, config.backend.port)?;
    let supervisor = ProcessSupervisor::new(config.backend)?;

    let state = Arc::new(AppState {
        supervisor: supervisor.clone(),
        forwarder,
        live_reload_enabled: config.live_reload_enabled,
    });
    let app = app::create_router(state);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let address = listener.local_addr()?;

    let served = match rustls_config {
        Some(rustls_config) => {
            tracing::info!(%address, "Starting proxy (HTTPS)");
            tls::serve(listener, rustls_config, app).await
        }
        None => {
            tracing::info!(%address, "Starting proxy");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
        }
    };

    supervisor.terminate().await;
    served?;

    Ok(())
}

/// Wait for shutdown signal (Ctrl-C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, stopping proxy...");
}

/// Create proxy configuration from devgate config.
///
/// # Arguments
///
/// * `config` - Loaded devgate configuration
///
/// # Errors
///
/// Returns `ConfigError::Validation` if no backend command is configured.
pub fn proxy_config_from_config(config: &devgate_config::Config) -> Result<ProxyConfig, ConfigError> {
    Ok(ProxyConfig {
        host: config.server.host.clone(),
        port: config.server.port,
        backend: SupervisorConfig::from_backend(&config.backend_resolved)?,
        live_reload_enabled: config.live_reload.enabled,
        tls: config.server.tls(),
    })
}
