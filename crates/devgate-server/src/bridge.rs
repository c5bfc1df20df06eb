//! WebSocket relay between the browser and the backend.
//!
//! Frames are copied verbatim in both directions. When either side closes or
//! fails, the other side is closed too.

use std::fmt::Display;

use axum::extract::ws::{self, WebSocket, WebSocketUpgrade};
use axum::http::header::{HOST, ORIGIN, SEC_WEBSOCKET_PROTOCOL};
use axum::http::{HeaderMap, Uri};
use axum::response::Response;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::ProxyError;
use crate::forward::{Forwarder, is_hop_by_hop};

type BackendSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handshake headers the backend connection generates itself.
const HANDSHAKE_HEADERS: &[&str] = &[
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-extensions",
];

/// Open the backend socket at the same path, then accept the browser upgrade.
///
/// The backend is connected first so its chosen subprotocol can be echoed to
/// the browser.
///
/// # Errors
///
/// Returns `ProxyError::Bridge` if the backend refuses the WebSocket.
pub async fn bridge(
    forwarder: &Forwarder,
    upgrade: WebSocketUpgrade,
    uri: &Uri,
    headers: &HeaderMap,
) -> Result<Response, ProxyError> {
    let path = uri
        .path_and_query()
        .map_or("/", axum::http::uri::PathAndQuery::as_str);
    let url = format!("{}{path}", forwarder.origin().replacen("http://", "ws://", 1));

    let mut request = url.as_str().into_client_request()?;
    for (name, value) in headers {
        if is_hop_by_hop(name) || name == HOST || HANDSHAKE_HEADERS.contains(&name.as_str()) {
            continue;
        }
        request.headers_mut().append(name.clone(), value.clone());
    }
    if let Some(origin) = request.headers_mut().get_mut(ORIGIN) {
        origin.clone_from(forwarder.origin_header());
    }

    let (backend, handshake) = tokio_tungstenite::connect_async(request).await?;
    tracing::debug!(%url, "Backend WebSocket connected");

    let upgrade = match handshake
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
    {
        Some(protocol) => upgrade.protocols([protocol.to_owned()]),
        None => upgrade,
    };

    Ok(upgrade.on_upgrade(move |browser| relay_both(browser, backend)))
}

async fn relay_both(browser: WebSocket, backend: BackendSocket) {
    let (browser_tx, browser_rx) = browser.split();
    let (backend_tx, backend_rx) = backend.split();

    tokio::select! {
        () = relay(browser_rx, backend_tx, to_backend) => {
            tracing::debug!("Browser side of bridged WebSocket ended");
        }
        () = relay(backend_rx, browser_tx, to_browser) => {
            tracing::debug!("Backend side of bridged WebSocket ended");
        }
    }
}

/// Copy messages from `source` into `sink`, closing `sink` when `source` ends.
async fn relay<S, K, A, B, E>(mut source: S, mut sink: K, convert: fn(A) -> Option<B>)
where
    S: Stream<Item = Result<A, E>> + Unpin,
    K: Sink<B> + Unpin,
    E: Display,
{
    while let Some(message) = source.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "Bridged WebSocket read failed");
                break;
            }
        };
        let Some(message) = convert(message) else {
            continue;
        };
        if sink.send(message).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

fn to_backend(message: ws::Message) -> Option<Message> {
    Some(match message {
        ws::Message::Text(text) => Message::text(text.as_str().to_owned()),
        ws::Message::Binary(data) => Message::Binary(data),
        ws::Message::Ping(data) => Message::Ping(data),
        ws::Message::Pong(data) => Message::Pong(data),
        ws::Message::Close(frame) => Message::Close(frame.map(|f| CloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        })),
    })
}

fn to_browser(message: Message) -> Option<ws::Message> {
    Some(match message {
        Message::Text(text) => ws::Message::Text(text.as_str().to_owned().into()),
        Message::Binary(data) => ws::Message::Binary(data),
        Message::Ping(data) => ws::Message::Ping(data),
        Message::Pong(data) => ws::Message::Pong(data),
        Message::Close(frame) => ws::Message::Close(frame.map(|f| ws::CloseFrame {
            code: f.code.into(),
            reason: f.reason.as_str().to_owned().into(),
        })),
        // Raw frames never surface from a read
        Message::Frame(_) => return None,
    })
}
