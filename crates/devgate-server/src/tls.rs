//! HTTPS front door.

use axum::Router;
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use devgate_config::TlsFiles;
use tokio::net::TcpListener;

use crate::error::ProxyError;

/// Load the PEM certificate chain and key.
///
/// # Errors
///
/// Returns `ProxyError::Tls` if either file is missing or unusable.
pub(crate) async fn load(files: &TlsFiles) -> Result<RustlsConfig, ProxyError> {
    if rustls::crypto::CryptoProvider::get_default().is_none() {
        // Losing the race leaves another provider installed, which is fine
        let _ = rustls::crypto::ring::default_provider().install_default();
    }

    RustlsConfig::from_pem_file(&files.cert, &files.key)
        .await
        .map_err(|e| {
            ProxyError::Tls(format!(
                "{} / {}: {e}",
                files.cert.display(),
                files.key.display()
            ))
        })
}

/// Serve `app` over TLS on an already bound listener until Ctrl-C.
pub(crate) async fn serve(
    listener: TcpListener,
    tls: RustlsConfig,
    app: Router,
) -> std::io::Result<()> {
    let handle = Handle::new();
    let shutdown = handle.clone();
    tokio::spawn(async move {
        crate::shutdown_signal().await;
        shutdown.graceful_shutdown(None);
    });

    axum_server::from_tcp_rustls(listener.into_std()?, tls)
        .handle(handle)
        .serve(app.into_make_service())
        .await
}
