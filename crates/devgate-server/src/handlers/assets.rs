//! Proxy-owned asset routes.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

/// Route serving the browser live-reload client.
pub(crate) const LIVE_RELOAD_SCRIPT_ROUTE: &str = "/__devgate/live-reload.js";

/// Serve the embedded live-reload script.
pub(crate) async fn live_reload_script() -> Response {
    let name = devgate_assets::LIVE_RELOAD_SCRIPT;
    match devgate_assets::get(name) {
        Some(content) => (
            [
                (header::CONTENT_TYPE, devgate_assets::mime_for(name)),
                (header::CACHE_CONTROL, "no-cache".to_owned()),
            ],
            content.into_owned(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_live_reload_script_served() {
        let response = live_reload_script().await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/javascript; charset=utf-8"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&body).contains("/__devgate/live-reload"));
    }
}
