//! Backend-side live-reload hub.
//!
//! A backend that produces site output calls [`ChangeHub::notify`] after each
//! rebuild. The hub coalesces bursts and pushes one JSON array per batch to
//! every socket connected to [`LIVE_RELOAD_PATH`](crate::LIVE_RELOAD_PATH).

mod batcher;
mod websocket;

use std::sync::{Arc, Weak};
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use devgate_config::LiveReloadConfig;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;

use crate::{ChangedFileSet, LIVE_RELOAD_PATH};
use batcher::ChangeBatcher;
pub use websocket::ws_handler;

/// Default window used to coalesce notifications.
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(100);

/// Broadcasts changed-file lists to connected live-reload sockets.
pub struct ChangeHub {
    batcher: ChangeBatcher,
    broadcaster: broadcast::Sender<ChangedFileSet>,
    /// Wakes the release task on new notifications and on drop.
    wake: Arc<Notify>,
}

impl ChangeHub {
    /// Create a hub that coalesces notifications arriving within `window`.
    #[must_use]
    pub fn new(window: Duration) -> Arc<Self> {
        let (broadcaster, _rx) = broadcast::channel(100);
        Arc::new(Self {
            batcher: ChangeBatcher::new(window),
            broadcaster,
            wake: Arc::new(Notify::new()),
        })
    }

    /// Create a hub using the configured `live_reload.debounce_ms` window.
    #[must_use]
    pub fn from_config(config: &LiveReloadConfig) -> Arc<Self> {
        Self::new(config.debounce())
    }

    /// Spawn the task that releases batches to subscribers.
    ///
    /// The task sleeps until the pending batch's deadline and ends once the
    /// last handle to the hub is dropped.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let hub: Weak<Self> = Arc::downgrade(self);
        let wake = Arc::clone(&self.wake);

        tokio::spawn(async move {
            loop {
                // No strong handle may be held while waiting
                let deadline = {
                    let Some(hub) = hub.upgrade() else {
                        break;
                    };
                    hub.release_ready();
                    hub.batcher.next_deadline()
                };

                match deadline {
                    Some(deadline) => tokio::select! {
                        () = tokio::time::sleep_until(deadline.into()) => {}
                        () = wake.notified() => {}
                    },
                    None => wake.notified().await,
                }
            }
        })
    }

    fn release_ready(&self) {
        if let Some(batch) = self.batcher.drain_ready() {
            let receivers = self.broadcaster.send(batch.clone()).unwrap_or(0);
            tracing::info!(
                paths = batch.len(),
                receivers,
                "Live reload batch pushed"
            );
        }
    }

    /// Record that a rebuild changed `paths` (root-relative).
    pub fn notify<I, S>(&self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let changed = ChangedFileSet::new(paths);
        tracing::debug!(paths = ?changed.paths(), "Rebuild changed files");
        self.batcher.record(changed);
        self.wake.notify_one();
    }

    /// Get a receiver for released batches.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChangedFileSet> {
        self.broadcaster.subscribe()
    }

    /// Router serving the push channel at [`LIVE_RELOAD_PATH`].
    pub fn router<S>(self: &Arc<Self>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        Router::new()
            .route(LIVE_RELOAD_PATH, get(ws_handler))
            .with_state(Arc::clone(self))
    }
}

impl Drop for ChangeHub {
    fn drop(&mut self) {
        self.wake.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_notifications_are_batched() {
        let hub = ChangeHub::new(Duration::from_millis(20));
        let _task = hub.start();
        let mut rx = hub.subscribe();

        hub.notify(["/index.html", "/styles/a.css"]);
        hub.notify(["styles/a.css", "/img/logo.png"]);

        let batch = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            batch.paths(),
            ["/index.html", "/styles/a.css", "/img/logo.png"]
        );
    }

    #[tokio::test]
    async fn test_from_config_uses_debounce_window() {
        let config = LiveReloadConfig {
            enabled: true,
            debounce_ms: 300,
        };
        let hub = ChangeHub::from_config(&config);
        let _task = hub.start();
        let mut rx = hub.subscribe();

        hub.notify(["/a.css"]);

        // Still inside the configured window
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        let batch = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.paths(), ["/a.css"]);
    }

    #[tokio::test]
    async fn test_later_notifications_form_a_new_batch() {
        let hub = ChangeHub::new(Duration::from_millis(20));
        let _task = hub.start();
        let mut rx = hub.subscribe();

        hub.notify(["/a.css"]);
        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        hub.notify(["/b.css"]);
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.paths(), ["/a.css"]);
        assert_eq!(second.paths(), ["/b.css"]);
    }

    #[tokio::test]
    async fn test_task_stops_when_hub_dropped() {
        let hub = ChangeHub::new(DEFAULT_BATCH_WINDOW);
        let task = hub.start();
        drop(hub);

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[cfg(feature = "client")]
    #[tokio::test]
    async fn test_socket_receives_json_array() {
        use futures_util::StreamExt;
        use tokio_tungstenite::tungstenite::Message;

        let hub = ChangeHub::new(Duration::from_millis(10));
        let _task = hub.start();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app: Router = hub.router();
        let server = tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let (mut socket, _) =
            tokio_tungstenite::connect_async(format!("ws://{addr}{LIVE_RELOAD_PATH}"))
                .await
                .unwrap();

        // Subscription happens after the upgrade completes; keep notifying
        // until the first push arrives.
        let message = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                hub.notify(["/styles/a.css"]);
                tokio::select! {
                    message = socket.next() => break message,
                    () = tokio::time::sleep(Duration::from_millis(50)) => {}
                }
            }
        })
        .await
        .unwrap();

        let Some(Ok(Message::Text(text))) = message else {
            panic!("expected a text frame, got {message:?}");
        };
        assert_eq!(text.as_str(), r#"["/styles/a.css"]"#);

        server.abort();
    }
}
