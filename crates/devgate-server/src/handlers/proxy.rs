//! Catch-all proxy handler.
//!
//! Every request not owned by the proxy lands here and is routed to one of
//! the bootstrap page, the WebSocket bridge, or the HTTP forwarder.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};

use super::{is_websocket_upgrade, wants_bootstrap};
use crate::bootstrap::bootstrap_response;
use crate::bridge::bridge;
use crate::state::AppState;
use crate::supervisor::Startup;

/// Proxy a request to the backend, starting it if needed.
pub(crate) async fn proxy_handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    if is_websocket_upgrade(request.headers()) {
        return bridge_request(&state, request).await;
    }

    match state.supervisor.ensure_started().await {
        Startup::Ready => forward(&state, request).await,
        Startup::Starting(attempt) => {
            if wants_bootstrap(request.method(), request.headers()) {
                tracing::debug!(path = %request.uri().path(), "Serving bootstrap page");
                return bootstrap_response(&attempt, request.method() == Method::HEAD);
            }
            match attempt.wait().await {
                Ok(()) => forward(&state, request).await,
                Err(e) => e.into_response(),
            }
        }
    }
}

async fn forward(state: &AppState, request: Request) -> Response {
    state.supervisor.touch();

    match state.forwarder.forward(request).await {
        Ok(forwarded) => {
            if forwarded.reload_requested {
                tracing::info!("Backend requested reload");
                state.supervisor.terminate().await;
            }
            forwarded.response
        }
        Err(e) => {
            tracing::warn!(error = %e, "Forwarding to backend failed");
            e.into_response()
        }
    }
}

async fn bridge_request(state: &Arc<AppState>, request: Request) -> Response {
    if let Startup::Starting(attempt) = state.supervisor.ensure_started().await
        && let Err(e) = attempt.wait().await
    {
        return (StatusCode::BAD_GATEWAY, e.to_string()).into_response();
    }

    let (mut parts, _body) = request.into_parts();
    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, state).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };
    state.supervisor.touch();

    match bridge(&state.forwarder, upgrade, &parts.uri, &parts.headers).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(error = %e, path = %parts.uri.path(), "WebSocket bridge failed");
            e.into_response()
        }
    }
}
