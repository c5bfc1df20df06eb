//! Plain HTTP forwarding to the backend.

use axum::body::{Body, HttpBody};
use axum::extract::Request;
use axum::http::header::{HOST, ORIGIN};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::Response;

use crate::error::ProxyError;

/// Response header a backend sets to ask for a restart.
pub const RELOAD_HEADER: &str = "x-devgate-reload";

/// Value of [`RELOAD_HEADER`] that triggers the restart.
pub const RELOAD_RESTART: &str = "restart";

/// Headers that describe a single connection and are never copied.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Whether a header belongs to one connection leg only.
pub(crate) fn is_hop_by_hop(name: &HeaderName) -> bool {
    let name = name.as_str();
    HOP_BY_HOP.contains(&name) || name.starts_with("proxy-")
}

fn copy_headers(from: &HeaderMap) -> HeaderMap {
    from.iter()
        .filter(|(name, _)| !is_hop_by_hop(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Backend response plus what the proxy needs to know about it.
#[derive(Debug)]
pub struct Forwarded {
    /// Response to hand to the browser.
    pub response: Response,
    /// The backend asked to be restarted.
    pub reload_requested: bool,
}

/// Sends browser requests to the backend's loopback address.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    origin: String,
    origin_header: HeaderValue,
    host_header: HeaderValue,
}

impl Forwarder {
    /// Create a forwarder targeting `hostname:port`.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::Forward` if the HTTP client cannot be built, or
    /// `ProxyError::InvalidBackend` if the address is not a valid header value.
    pub fn new(hostname: &str, port: u16) -> Result<Self, ProxyError> {
        // Redirects must reach the browser untouched
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()?;

        let authority = format!("{hostname}:{port}");
        let origin = format!("http://{authority}");
        let invalid = |_: axum::http::header::InvalidHeaderValue| {
            ProxyError::InvalidBackend(authority.clone())
        };

        Ok(Self {
            client,
            origin_header: HeaderValue::from_str(&origin).map_err(invalid)?,
            host_header: HeaderValue::from_str(&authority).map_err(invalid)?,
            origin,
        })
    }

    /// Backend origin, e.g. `http://127.0.0.1:3001`.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Backend origin as a header value, for rewriting `Origin`.
    pub(crate) fn origin_header(&self) -> &HeaderValue {
        &self.origin_header
    }

    /// Forward a request, streaming both bodies.
    ///
    /// Method, path, query, headers and body pass through unchanged except
    /// for `Host` and `Origin`, which are rewritten to the backend.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::Forward` if the backend cannot be reached.
    pub async fn forward(&self, request: Request) -> Result<Forwarded, ProxyError> {
        let (parts, body) = request.into_parts();
        let path = parts
            .uri
            .path_and_query()
            .map_or("/", axum::http::uri::PathAndQuery::as_str);
        let url = format!("{}{path}", self.origin);

        let mut headers = copy_headers(&parts.headers);
        headers.insert(HOST, self.host_header.clone());
        if headers.contains_key(ORIGIN) {
            headers.insert(ORIGIN, self.origin_header.clone());
        }

        let mut outgoing = self.client.request(parts.method, url).headers(headers);
        if body.size_hint().exact() != Some(0) {
            outgoing = outgoing.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let upstream = outgoing.send().await?;

        let reload_requested = upstream
            .headers()
            .get(RELOAD_HEADER)
            .is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(RELOAD_RESTART.as_bytes()));

        let status = upstream.status();
        let headers = copy_headers(upstream.headers());
        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;

        Ok(Forwarded {
            response,
            reload_requested,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, StatusCode, header};
    use axum::response::IntoResponse;
    use axum::routing::{any, get};
    use pretty_assertions::assert_eq;
    use tokio::net::TcpListener;

    async fn echo(method: Method, uri: axum::http::Uri, headers: HeaderMap, body: String) -> String {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-")
                .to_owned()
        };
        format!(
            "{method} {uri} host={} origin={} x-custom={} body={body}",
            header("host"),
            header("origin"),
            header("x-custom"),
        )
    }

    async fn backend() -> u16 {
        let app = axum::Router::new()
            .route("/echo", any(echo))
            .route(
                "/moved",
                get(|| async { (StatusCode::FOUND, [(header::LOCATION, "/elsewhere")]) }),
            )
            .route(
                "/rebuild",
                get(|| async { ([(RELOAD_HEADER, "Restart")], "rebuilt") }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    async fn text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_malformed_backend_address_is_invalid_backend() {
        let result = Forwarder::new("bad\nhost", 3001);
        assert!(matches!(result, Err(ProxyError::InvalidBackend(_))));
    }

    #[test]
    fn test_hop_by_hop_headers() {
        assert!(is_hop_by_hop(&header::CONNECTION));
        assert!(is_hop_by_hop(&header::TRANSFER_ENCODING));
        assert!(is_hop_by_hop(&header::PROXY_AUTHORIZATION));
        assert!(is_hop_by_hop(&HeaderName::from_static("proxy-connection")));
        assert!(!is_hop_by_hop(&header::CONTENT_TYPE));
        assert!(!is_hop_by_hop(&header::COOKIE));
    }

    #[tokio::test]
    async fn test_forward_rewrites_host_and_origin() {
        let port = backend().await;
        let forwarder = Forwarder::new("127.0.0.1", port).unwrap();
        let request = Request::builder()
            .method(Method::POST)
            .uri("http://localhost:3000/echo?page=2")
            .header(header::HOST, "localhost:3000")
            .header(header::ORIGIN, "http://localhost:3000")
            .header("x-custom", "kept")
            .body(Body::from("payload"))
            .unwrap();

        let forwarded = forwarder.forward(request).await.unwrap();

        assert!(!forwarded.reload_requested);
        assert_eq!(
            text(forwarded.response).await,
            format!(
                "POST /echo?page=2 host=127.0.0.1:{port} origin=http://127.0.0.1:{port} x-custom=kept body=payload"
            )
        );
    }

    #[tokio::test]
    async fn test_forward_without_origin_does_not_add_one() {
        let port = backend().await;
        let forwarder = Forwarder::new("127.0.0.1", port).unwrap();
        let request = Request::builder().uri("/echo").body(Body::empty()).unwrap();

        let forwarded = forwarder.forward(request).await.unwrap();

        assert!(text(forwarded.response).await.contains("origin=- "));
    }

    #[tokio::test]
    async fn test_redirect_is_not_followed() {
        let port = backend().await;
        let forwarder = Forwarder::new("127.0.0.1", port).unwrap();
        let request = Request::builder().uri("/moved").body(Body::empty()).unwrap();

        let forwarded = forwarder.forward(request).await.unwrap();

        assert_eq!(forwarded.response.status(), StatusCode::FOUND);
        assert_eq!(forwarded.response.headers()[header::LOCATION], "/elsewhere");
    }

    #[tokio::test]
    async fn test_reload_header_detected() {
        let port = backend().await;
        let forwarder = Forwarder::new("127.0.0.1", port).unwrap();
        let request = Request::builder().uri("/rebuild").body(Body::empty()).unwrap();

        let forwarded = forwarder.forward(request).await.unwrap();

        assert!(forwarded.reload_requested);
        // Passed through unmodified
        assert_eq!(forwarded.response.headers()[RELOAD_HEADER], "Restart");
        assert_eq!(text(forwarded.response).await, "rebuilt");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_bad_gateway() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let forwarder = Forwarder::new("127.0.0.1", port).unwrap();
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();

        let err = forwarder.forward(request).await.unwrap_err();

        assert!(matches!(err, ProxyError::Forward(_)));
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }
}
