//! HTTP request handlers.

pub(crate) mod assets;
pub(crate) mod proxy;

use axum::http::{HeaderMap, Method, header};

/// Whether the request asks for a WebSocket upgrade.
pub(crate) fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Whether a browser would render the bootstrap page for this request.
///
/// Only page navigations qualify; asset and API requests issued while the
/// backend boots wait for it instead.
pub(crate) fn wants_bootstrap(method: &Method, headers: &HeaderMap) -> bool {
    if method != Method::GET && method != Method::HEAD {
        return false;
    }
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("text/html"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(header::HeaderName, &'static str)]) -> HeaderMap {
        pairs
            .iter()
            .map(|(name, value)| (name.clone(), HeaderValue::from_static(value)))
            .collect()
    }

    #[test]
    fn test_websocket_upgrade_detection() {
        assert!(is_websocket_upgrade(&headers(&[(header::UPGRADE, "websocket")])));
        assert!(is_websocket_upgrade(&headers(&[(header::UPGRADE, "WebSocket")])));
        assert!(!is_websocket_upgrade(&headers(&[(header::UPGRADE, "h2c")])));
        assert!(!is_websocket_upgrade(&HeaderMap::new()));
    }

    #[test]
    fn test_page_navigation_wants_bootstrap() {
        let navigation = headers(&[(
            header::ACCEPT,
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        )]);

        assert!(wants_bootstrap(&Method::GET, &navigation));
        assert!(wants_bootstrap(&Method::HEAD, &navigation));
        assert!(!wants_bootstrap(&Method::POST, &navigation));
    }

    #[test]
    fn test_asset_request_does_not_want_bootstrap() {
        let script = headers(&[(header::ACCEPT, "*/*")]);

        assert!(!wants_bootstrap(&Method::GET, &script));
        assert!(!wants_bootstrap(&Method::GET, &HeaderMap::new()));
    }
}
