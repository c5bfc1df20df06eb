//! Router construction.
//!
//! Builds the axum router with all routes and middleware.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::handlers::assets::LIVE_RELOAD_SCRIPT_ROUTE;
use crate::state::AppState;

/// Create the application router.
///
/// # Arguments
///
/// * `state` - Shared application state
pub(crate) fn create_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new();

    // Browser client for the backend's live-reload socket
    if state.live_reload_enabled {
        router = router.route(
            LIVE_RELOAD_SCRIPT_ROUTE,
            get(handlers::assets::live_reload_script),
        );
    }

    // Everything else belongs to the backend
    router
        .fallback(handlers::proxy::proxy_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(all(test, unix))]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use axum::response::Response;
    use pretty_assertions::assert_eq;
    use tokio::net::TcpListener;
    use tower::ServiceExt;

    use super::*;
    use crate::forward::{Forwarder, RELOAD_HEADER, RELOAD_RESTART};
    use crate::supervisor::{ProcessSupervisor, Startup, SupervisorConfig};

    const HTML: &str = "text/html,application/xhtml+xml,*/*;q=0.8";

    async fn stand_in_backend() -> u16 {
        let app = Router::new()
            .route("/", get(|| async { "home" }))
            .route("/api/data", get(|| async { "data" }))
            .route(
                "/rebuild",
                get(|| async { ([(RELOAD_HEADER, RELOAD_RESTART)], "rebuilt") }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    fn proxy(program: &str, port: u16, live_reload_enabled: bool) -> (Router, ProcessSupervisor) {
        let supervisor = ProcessSupervisor::new(SupervisorConfig {
            program: program.to_owned(),
            args: vec!["-c".to_owned(), "sleep 60".to_owned()],
            cwd: std::env::temp_dir(),
            env: BTreeMap::new(),
            hostname: "127.0.0.1".to_owned(),
            port,
            show_terminal: false,
            idle_timeout: Duration::from_secs(60),
            probe_interval: Duration::from_millis(50),
        })
        .unwrap();
        let state = Arc::new(AppState {
            supervisor: supervisor.clone(),
            forwarder: Forwarder::new("127.0.0.1", port).unwrap(),
            live_reload_enabled,
        });
        (create_router(state), supervisor)
    }

    fn get_request(path: &str, accept: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(path);
        if let Some(accept) = accept {
            builder = builder.header(header::ACCEPT, accept);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_page_request_gets_bootstrap_while_starting() {
        let (app, supervisor) = proxy("sh", stand_in_backend().await, false);

        let response = app.oneshot(get_request("/", Some(HTML))).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        let body = text(response).await;
        assert!(body.contains("$ sh -c sleep 60"));
        assert!(body.contains("location.reload()"));
        assert_eq!(supervisor.generation(), 1);
        supervisor.terminate().await;
    }

    #[tokio::test]
    async fn test_asset_request_waits_then_forwards() {
        let (app, supervisor) = proxy("sh", stand_in_backend().await, false);

        let response = app.oneshot(get_request("/api/data", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(text(response).await, "data");
        assert!(supervisor.is_ready());
        supervisor.terminate().await;
    }

    #[tokio::test]
    async fn test_startup_failure_is_service_unavailable() {
        let (app, _supervisor) = proxy("/nonexistent/devgate-backend", stand_in_backend().await, false);

        let response = app.oneshot(get_request("/api/data", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_reload_header_restarts_on_next_request() {
        let (app, supervisor) = proxy("sh", stand_in_backend().await, false);
        if let Startup::Starting(attempt) = supervisor.ensure_started().await {
            attempt.wait().await.unwrap();
        }

        let response = app
            .clone()
            .oneshot(get_request("/rebuild", Some(HTML)))
            .await
            .unwrap();
        assert_eq!(text(response).await, "rebuilt");
        assert!(!supervisor.is_ready());

        let response = app.oneshot(get_request("/", Some(HTML))).await.unwrap();
        assert!(text(response).await.starts_with("<!doctype html>"));
        assert_eq!(supervisor.generation(), 2);
        supervisor.terminate().await;
    }

    #[tokio::test]
    async fn test_live_reload_script_route() {
        let (app, supervisor) = proxy("sh", stand_in_backend().await, true);

        let response = app
            .oneshot(get_request(LIVE_RELOAD_SCRIPT_ROUTE, None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        // Served by the proxy itself
        assert_eq!(supervisor.generation(), 0);
    }

    #[tokio::test]
    async fn test_live_reload_script_route_disabled() {
        let (app, _supervisor) = proxy("/nonexistent/devgate-backend", stand_in_backend().await, false);

        let response = app
            .oneshot(get_request(LIVE_RELOAD_SCRIPT_ROUTE, None))
            .await
            .unwrap();

        // Proxied like any other path
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
