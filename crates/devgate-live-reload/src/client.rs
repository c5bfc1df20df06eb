//! Reconnecting live-reload client.
//!
//! [`LiveReloadClient`] owns exactly one socket at a time and drives an
//! explicit [`ConnectionState`] from socket events only. Page access goes
//! through the [`Document`] trait so the same rules run against a browser
//! bridge, a headless renderer, or a test double.

use std::future::Future;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::cache_bust::fresh_value;
use crate::refresh::{PageSnapshot, RefreshAction, RefreshPlan, plan};
use crate::{ChangedFileSet, LIVE_RELOAD_PATH};

/// Fixed delay before reconnecting after the socket closes.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Page operations the client needs.
pub trait Document {
    /// Current page URL and the elements the planner can patch.
    fn snapshot(&self) -> PageSnapshot;

    /// Replace stylesheet `index` by a copy pointing at `href`.
    ///
    /// The copy is inserted right after the original and the original is
    /// removed only afterwards, so the page never renders unstyled.
    fn swap_stylesheet(&mut self, index: usize, href: &str);

    /// Point image `index` at `src`.
    fn set_image_source(&mut self, index: usize, src: &str);

    /// Reload the whole page.
    fn reload(&mut self);

    /// Keep `changes` in short-lived storage that survives one reload.
    fn save_pending(&mut self, changes: &ChangedFileSet);

    /// Remove and return whatever [`save_pending`](Self::save_pending) stored.
    fn take_pending(&mut self) -> Option<ChangedFileSet>;
}

/// Socket state as seen by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Client error.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The page URL cannot host a live-reload socket.
    #[error("Cannot derive live reload socket from {0}")]
    UnsupportedPage(Url),
}

/// Live-reload socket URL for a page served through the proxy.
///
/// # Errors
///
/// Returns `ClientError::UnsupportedPage` for non-HTTP pages.
pub fn socket_url(page: &Url) -> Result<Url, ClientError> {
    let scheme = match page.scheme() {
        "http" => "ws",
        "https" => "wss",
        _ => return Err(ClientError::UnsupportedPage(page.clone())),
    };
    let mut url = page.clone();
    url.set_scheme(scheme)
        .map_err(|()| ClientError::UnsupportedPage(page.clone()))?;
    url.set_path(LIVE_RELOAD_PATH);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// How a connection ended.
enum Disconnect {
    /// The socket closed or could not be opened.
    Closed,
    /// The client reloaded the page, which drops its socket.
    Reloaded,
}

/// Live-reload client bound to one page.
pub struct LiveReloadClient<D> {
    document: D,
    state: ConnectionState,
    was_closed_once: bool,
    reloaded: bool,
    reconnect_delay: Duration,
}

impl<D: Document> LiveReloadClient<D> {
    /// Create a client for `document`. No socket is opened until [`run`](Self::run).
    pub fn new(document: D) -> Self {
        Self {
            document,
            state: ConnectionState::Connecting,
            was_closed_once: false,
            reloaded: false,
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    /// Override the reconnect delay.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn document(&self) -> &D {
        &self.document
    }

    pub fn into_document(self) -> D {
        self.document
    }

    /// Socket opened.
    ///
    /// After an unexpected close the backend may have restarted, so the page
    /// is reloaded unconditionally. Otherwise changes saved before the last
    /// reload are replayed.
    pub fn on_open(&mut self) {
        self.state = ConnectionState::Open;

        if self.was_closed_once {
            tracing::info!("Live reload socket reconnected, reloading page");
            self.reload();
            return;
        }

        if let Some(pending) = self.document.take_pending() {
            tracing::debug!(count = pending.len(), "Replaying changes saved before reload");
            self.apply(&pending);
        }
    }

    /// Push message received.
    pub fn on_message(&mut self, payload: &str) {
        match ChangedFileSet::from_json(payload) {
            Ok(changed) => self.apply(&changed),
            Err(e) => tracing::warn!(error = %e, "Ignoring malformed live reload message"),
        }
    }

    /// Socket closed.
    pub fn on_close(&mut self) {
        self.state = ConnectionState::Closed;
        if self.reloaded {
            // A reloaded page starts over with a fresh client
            self.reloaded = false;
            self.was_closed_once = false;
        } else {
            self.was_closed_once = true;
        }
    }

    /// Apply a changed-file list to the page.
    pub fn apply(&mut self, changed: &ChangedFileSet) {
        let snapshot = self.document.snapshot();
        match plan(changed, &snapshot, &fresh_value()) {
            RefreshPlan::Reload { replay } => {
                if let Some(replay) = replay {
                    self.document.save_pending(&replay);
                }
                self.reload();
            }
            RefreshPlan::Patch(actions) => {
                for action in actions {
                    match action {
                        RefreshAction::SwapStylesheet { index, href } => {
                            self.document.swap_stylesheet(index, &href);
                        }
                        RefreshAction::SetImageSource { index, src } => {
                            self.document.set_image_source(index, &src);
                        }
                    }
                }
            }
        }
    }

    fn reload(&mut self) {
        self.document.reload();
        self.reloaded = true;
    }

    /// Keep a socket to `socket_url` open until `shutdown` resolves.
    ///
    /// Every close schedules a reconnect after the fixed delay, retried
    /// indefinitely. A reload reconnects immediately, like a freshly loaded
    /// page would.
    pub async fn run<F>(&mut self, socket_url: &Url, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let disconnect = tokio::select! {
                () = &mut shutdown => return,
                disconnect = self.connect_once(socket_url) => disconnect,
            };

            let delay = match disconnect {
                Disconnect::Reloaded => Duration::ZERO,
                Disconnect::Closed => self.reconnect_delay,
            };
            tokio::select! {
                () = &mut shutdown => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn connect_once(&mut self, socket_url: &Url) -> Disconnect {
        self.state = ConnectionState::Connecting;

        match connect_async(socket_url.as_str()).await {
            Ok((mut socket, _)) => {
                self.on_open();
                while !self.reloaded {
                    match socket.next().await {
                        Some(Ok(Message::Text(text))) => self.on_message(text.as_str()),
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::debug!(error = %e, "Live reload socket failed");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::debug!(url = %socket_url, error = %e, "Live reload socket unavailable");
            }
        }

        let disconnect = if self.reloaded {
            Disconnect::Reloaded
        } else {
            Disconnect::Closed
        };
        self.on_close();
        disconnect
    }
}
