//! Embedded browser assets for the devgate development proxy.
//!
//! Assets are compiled into the binary via `rust-embed`:
//!
//! - [`BOOTSTRAP_SHELL`]: opening HTML of the "starting…" page; the proxy
//!   streams progress lines into its `<pre>` element.
//! - [`LIVE_RELOAD_SCRIPT`]: the browser live-reload client.

use std::borrow::Cow;

/// Asset name of the bootstrap page shell.
pub const BOOTSTRAP_SHELL: &str = "bootstrap.html";

/// Asset name of the browser live-reload client.
pub const LIVE_RELOAD_SCRIPT: &str = "live-reload.js";

#[derive(rust_embed::RustEmbed)]
#[folder = "assets"]
struct Assets;

/// Get an asset by name.
///
/// Returns the file contents if the asset exists, `None` otherwise.
pub fn get(path: &str) -> Option<Cow<'static, [u8]>> {
    Assets::get(path).map(|f| f.data)
}

/// Iterate all available asset names.
pub fn iter() -> impl Iterator<Item = Cow<'static, str>> {
    Assets::iter()
}

/// Return the MIME type for the given file path, with a charset for text.
pub fn mime_for(path: &str) -> String {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if mime.type_() == mime_guess::mime::TEXT {
        format!("{mime}; charset=utf-8")
    } else {
        mime.to_string()
    }
}
