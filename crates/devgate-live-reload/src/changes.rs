//! Changed-file lists pushed per rebuild.

use serde::{Deserialize, Serialize};

/// Ordered list of root-relative paths changed by one rebuild.
///
/// Serializes as a bare JSON array of strings, which is the wire format of
/// the live-reload push channel. Every path carries a leading slash.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct ChangedFileSet {
    paths: Vec<String>,
}

impl ChangedFileSet {
    /// Create a set from paths, adding a leading slash where missing.
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(|p| root_relative(p.into())).collect(),
        }
    }

    /// Parse a push message.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a JSON array of strings.
    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Encode as a push message.
    #[must_use]
    pub fn to_json(&self) -> String {
        // A list of strings always serializes
        serde_json::to_string(&self.paths).unwrap_or_else(|_| "[]".to_owned())
    }

    /// Paths in push order.
    #[must_use]
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// Copy of this set with every occurrence of `path` removed.
    #[must_use]
    pub fn without(&self, path: &str) -> Self {
        Self {
            paths: self.paths.iter().filter(|p| *p != path).cloned().collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }
}

impl From<Vec<String>> for ChangedFileSet {
    fn from(paths: Vec<String>) -> Self {
        Self::new(paths)
    }
}

impl From<ChangedFileSet> for Vec<String> {
    fn from(set: ChangedFileSet) -> Self {
        set.paths
    }
}

fn root_relative(path: String) -> String {
    if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_adds_leading_slash() {
        let set = ChangedFileSet::new(["styles/a.css", "/index.html"]);
        assert_eq!(set.paths(), ["/styles/a.css", "/index.html"]);
    }

    #[test]
    fn test_wire_format_is_bare_array() {
        let set = ChangedFileSet::new(["/a.css", "/b.png"]);
        assert_eq!(set.to_json(), r#"["/a.css","/b.png"]"#);
        assert_eq!(ChangedFileSet::from_json(&set.to_json()).unwrap(), set);
    }

    #[test]
    fn test_from_json_rejects_non_array() {
        assert!(ChangedFileSet::from_json(r#"{"type":"reload"}"#).is_err());
        assert!(ChangedFileSet::from_json("[1, 2]").is_err());
        assert!(ChangedFileSet::from_json("not json").is_err());
    }

    #[test]
    fn test_without_preserves_order() {
        let set = ChangedFileSet::new(["/a.css", "/index.html", "/b.png"]);
        assert_eq!(set.without("/index.html").paths(), ["/a.css", "/b.png"]);
        assert!(set.contains("/index.html"));
    }
}
