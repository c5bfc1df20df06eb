//! Cache-busting query parameters.

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

/// Query parameter the live-reload client owns.
pub const CACHE_BUST_PARAM: &str = "devgate";

/// Characters that cannot appear raw in a query key or value.
const QUERY_COMPONENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'=')
    .add(b'>');

/// Set `param` to `value` in the query string of `url`.
///
/// Any existing occurrence of `param` is replaced; other parameters keep
/// their order and encoding, and the fragment is preserved. Works on
/// absolute, root-relative and relative URLs alike.
#[must_use]
pub fn cache_bust(url: &str, param: &str, value: &str) -> String {
    let (rest, fragment) = url.find('#').map_or((url, ""), |i| url.split_at(i));
    let (base, query) = rest.split_once('?').unwrap_or((rest, ""));

    let param = utf8_percent_encode(param, QUERY_COMPONENT).to_string();
    let value = utf8_percent_encode(value, QUERY_COMPONENT).to_string();

    let mut pairs: Vec<&str> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| pair.split('=').next() != Some(param.as_str()))
        .collect();
    let busted = format!("{param}={value}");
    pairs.push(&busted);

    format!("{base}?{}{fragment}", pairs.join("&"))
}

/// A value that differs from every previously generated one.
#[must_use]
pub fn fresh_value() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adds_param_to_bare_url() {
        assert_eq!(
            cache_bust("/styles/a.css", "devgate", "1"),
            "/styles/a.css?devgate=1"
        );
    }

    #[test]
    fn test_overwrites_existing_param_and_keeps_others() {
        assert_eq!(
            cache_bust("/a.css?v=3&devgate=old&theme=dark", "devgate", "new"),
            "/a.css?v=3&theme=dark&devgate=new"
        );
    }

    #[test]
    fn test_keeps_fragment() {
        assert_eq!(
            cache_bust("http://localhost:3000/img/logo.svg?size=2#icon", "devgate", "x"),
            "http://localhost:3000/img/logo.svg?size=2&devgate=x#icon"
        );
    }

    #[test]
    fn test_prefix_named_param_untouched() {
        assert_eq!(
            cache_bust("/a.css?devgate2=keep", "devgate", "1"),
            "/a.css?devgate2=keep&devgate=1"
        );
    }

    #[test]
    fn test_value_is_encoded() {
        assert_eq!(cache_bust("/a.css", "devgate", "a&b"), "/a.css?devgate=a%26b");
    }

    #[test]
    fn test_fresh_values_differ() {
        assert_ne!(fresh_value(), fresh_value());
    }
}
