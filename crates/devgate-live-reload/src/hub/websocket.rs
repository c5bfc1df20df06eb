//! WebSocket handler for the live-reload push channel.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use tokio::sync::broadcast;

use super::ChangeHub;
use crate::ChangedFileSet;

/// Handle WebSocket upgrade for live reload.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(hub): State<Arc<ChangeHub>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, hub))
}

/// Push every batch to the client until either side goes away.
async fn handle_socket(mut socket: WebSocket, hub: Arc<ChangeHub>) {
    let mut receiver: broadcast::Receiver<ChangedFileSet> = hub.subscribe();

    loop {
        tokio::select! {
            result = receiver.recv() => {
                match result {
                    Ok(changed) => {
                        if socket.send(Message::Text(changed.to_json().into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "Live reload subscriber lagged");
                    }
                }
            }
            // Clients send nothing meaningful; only watch for the close
            result = socket.recv() => {
                match result {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}
