//! Application state.
//!
//! Shared state for all request handlers.

use crate::forward::Forwarder;
use crate::supervisor::ProcessSupervisor;

/// Application state shared across all handlers.
pub(crate) struct AppState {
    /// Owner of the backend process.
    pub(crate) supervisor: ProcessSupervisor,
    /// HTTP client targeting the backend.
    pub(crate) forwarder: Forwarder,
    /// Serve the browser live-reload script.
    pub(crate) live_reload_enabled: bool,
}
