//! Live reload for the devgate development proxy.
//!
//! The push channel carries one JSON array of root-relative paths per
//! rebuild, e.g. `["/index.html", "/styles/site.css"]`.
//!
//! - [`hub`] (feature `hub`): backend-side broadcaster and WebSocket handler.
//! - [`client`] (feature `client`): reconnecting client that patches or
//!   reloads a page, driven through the [`client::Document`] trait.
//! - [`refresh`]: the pure partial-refresh planner both sides agree on.
//!
//! The browser script served by the proxy (`devgate-assets`) applies the same
//! rules as [`refresh::plan`].

mod cache_bust;
mod changes;
pub mod refresh;

#[cfg(feature = "client")]
pub mod client;
#[cfg(feature = "hub")]
pub mod hub;

pub use cache_bust::{CACHE_BUST_PARAM, cache_bust, fresh_value};
pub use changes::ChangedFileSet;

/// Path of the live-reload push channel on the backend (and, through the
/// proxy, on the front door).
pub const LIVE_RELOAD_PATH: &str = "/__devgate/live-reload";
