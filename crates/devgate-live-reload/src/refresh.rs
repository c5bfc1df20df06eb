//! Partial-refresh planning.
//!
//! Given a pushed [`ChangedFileSet`] and what is currently on the page, decide
//! whether the page can be patched in place (stylesheets swapped, images
//! refetched) or has to be reloaded.

use std::borrow::Cow;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::ChangedFileSet;
use crate::cache_bust::{CACHE_BUST_PARAM, cache_bust};

/// Image extensions that can be refetched in place.
const IMAGE_EXTENSIONS: &[&str] = &["apng", "avif", "gif", "jpeg", "jpg", "png", "svg", "webp"];

/// How a changed file is handled, by extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssetKind {
    Stylesheet,
    Image,
    Script,
    Other,
}

impl AssetKind {
    /// Classify a path by its (case-insensitive) extension.
    #[must_use]
    pub fn of(path: &str) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path);
        let Some((_, ext)) = name.rsplit_once('.') else {
            return Self::Other;
        };
        match ext.to_ascii_lowercase().as_str() {
            "css" => Self::Stylesheet,
            "js" | "mjs" => Self::Script,
            ext if IMAGE_EXTENSIONS.contains(&ext) => Self::Image,
            _ => Self::Other,
        }
    }
}

/// The parts of a page the planner looks at.
#[derive(Clone, Debug)]
pub struct PageSnapshot {
    /// Current page URL.
    pub url: Url,
    /// `href` of every `<link rel="stylesheet">`, in document order.
    pub stylesheets: Vec<String>,
    /// `href` of every stylesheet reached through an `@import` chain.
    pub imported_stylesheets: Vec<String>,
    /// `src` of every `<img>`, in document order.
    pub images: Vec<String>,
}

impl PageSnapshot {
    /// Snapshot of a page with no stylesheets or images.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            stylesheets: Vec::new(),
            imported_stylesheets: Vec::new(),
            images: Vec::new(),
        }
    }
}

/// A single in-place patch. Indices refer to the snapshot lists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshAction {
    /// Insert a copy of stylesheet `index` pointing at `href` right after
    /// it, then remove the original.
    SwapStylesheet { index: usize, href: String },
    /// Point image `index` at `src`.
    SetImageSource { index: usize, src: String },
}

/// Outcome of planning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshPlan {
    /// Apply these patches; an empty list means nothing on the page changed.
    Patch(Vec<RefreshAction>),
    /// Reload the page. `replay` holds changes to re-apply once the reloaded
    /// page connects again.
    Reload { replay: Option<ChangedFileSet> },
}

/// Output file that renders a page URL path.
///
/// `/` and `/guide/` map to their `index.html`; extensionless paths are
/// treated as directories too.
#[must_use]
pub fn page_output_path(url_path: &str) -> String {
    let path = decode(url_path);
    if path.ends_with('/') {
        format!("{path}index.html")
    } else if !has_extension(&path) {
        format!("{path}/index.html")
    } else {
        path.into_owned()
    }
}

/// Decide how to apply `changed` to `page`.
///
/// `bust_value` is written into the cache-busting parameter of every URL
/// the plan rewrites.
#[must_use]
pub fn plan(changed: &ChangedFileSet, page: &PageSnapshot, bust_value: &str) -> RefreshPlan {
    let current = page_output_path(page.url.path());
    if changed.contains(&current) {
        let rest = changed.without(&current);
        return RefreshPlan::Reload {
            replay: (!rest.is_empty()).then_some(rest),
        };
    }

    let mut actions = Vec::new();
    for path in changed.iter() {
        match AssetKind::of(path) {
            AssetKind::Stylesheet => {
                let before = actions.len();
                for (index, href) in page.stylesheets.iter().enumerate() {
                    if resolves_to(&page.url, href, path) {
                        actions.push(RefreshAction::SwapStylesheet {
                            index,
                            href: cache_bust(href, CACHE_BUST_PARAM, bust_value),
                        });
                    }
                }
                let only_imported = actions.len() == before
                    && page
                        .imported_stylesheets
                        .iter()
                        .any(|href| resolves_to(&page.url, href, path));
                if only_imported {
                    return RefreshPlan::Reload { replay: None };
                }
            }
            AssetKind::Image => {
                for (index, src) in page.images.iter().enumerate() {
                    if resolves_to(&page.url, src, path) {
                        actions.push(RefreshAction::SetImageSource {
                            index,
                            src: cache_bust(src, CACHE_BUST_PARAM, bust_value),
                        });
                    }
                }
            }
            AssetKind::Script => return RefreshPlan::Reload { replay: None },
            AssetKind::Other => {}
        }
    }

    RefreshPlan::Patch(actions)
}

/// Whether `href`, resolved against the page, points at root-relative `path`.
fn resolves_to(page: &Url, href: &str, path: &str) -> bool {
    page.join(href).is_ok_and(|url| decode(url.path()) == path)
}

fn decode(path: &str) -> Cow<'_, str> {
    percent_decode_str(path).decode_utf8_lossy()
}

fn has_extension(path: &str) -> bool {
    path.rsplit('/')
        .next()
        .is_some_and(|name| name.contains('.'))
}
