//! Selector synthesis from element attributes.
//!
//! Every selector has the form `key=value`. The key is one of
//! [`PRIORITY_ATTRIBUTES`] or [`STRUCTURAL_KEY`] and never contains `=` or `\`.
//! In the value, `\` is written as `\\` and `=` as `\=`, so the first `=` of a
//! selector is always the separator and [`split`] recovers the raw value.

use crate::browser::NodeSnapshot;

/// Identifying attributes, checked in order.
pub const PRIORITY_ATTRIBUTES: [&str; 4] = ["data-testid", "id", "aria-label", "name"];

/// Key used for the structural fallback.
pub const STRUCTURAL_KEY: &str = "css";

pub const SEPARATOR: char = '=';

/// Build a stable selector for a node.
///
/// Returns `attr=value` for the first non-empty priority attribute, otherwise
/// `css=<path>` from the node's structural path. Never returns an empty string.
pub fn synthesize(node: &NodeSnapshot) -> String {
    for attr in PRIORITY_ATTRIBUTES {
        if let Some(value) = node.attributes.get(attr) {
            let value = value.trim();
            if !value.is_empty() {
                return format!("{attr}{SEPARATOR}{}", escape_value(value));
            }
        }
    }
    structural(node)
}

fn structural(node: &NodeSnapshot) -> String {
    let path = node.path.trim();
    let tag = node.tag.trim();
    let value = if !path.is_empty() {
        path
    } else if !tag.is_empty() {
        tag
    } else {
        "*"
    };
    format!("{STRUCTURAL_KEY}{SEPARATOR}{}", escape_value(value))
}

/// Escape `\` and `=` in an attribute value.
pub fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '\\' || c == SEPARATOR {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Reverse of [`escape_value`].
pub fn unescape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Split a selector into its key and unescaped value.
pub fn split(selector: &str) -> Option<(&str, String)> {
    let (key, value) = selector.split_once(SEPARATOR)?;
    Some((key, unescape_value(value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(attrs: &[(&str, &str)], tag: &str, path: &str) -> NodeSnapshot {
        NodeSnapshot {
            tag: tag.into(),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            text: String::new(),
            path: path.into(),
        }
    }

    #[test]
    fn test_priority_order() {
        let n = node(
            &[("name", "q"), ("aria-label", "Search"), ("id", "search")],
            "input",
            "",
        );
        assert_eq!(synthesize(&n), "id=search");

        let n = node(&[("name", "q"), ("aria-label", "Search")], "input", "");
        assert_eq!(synthesize(&n), "aria-label=Search");

        let n = node(&[("name", "q"), ("data-testid", "search-box")], "input", "");
        assert_eq!(synthesize(&n), "data-testid=search-box");
    }

    #[test]
    fn test_empty_priority_value_is_skipped() {
        let n = node(&[("id", "  "), ("name", "email")], "input", "");
        assert_eq!(synthesize(&n), "name=email");
    }

    #[test]
    fn test_structural_fallback() {
        let n = node(&[("class", "btn")], "button", "#main > div:nth-of-type(2) > button");
        assert_eq!(synthesize(&n), "css=#main > div:nth-of-type(2) > button");

        let n = node(&[], "button", "");
        assert_eq!(synthesize(&n), "css=button");

        let n = node(&[], "", "");
        assert_eq!(synthesize(&n), "css=*");
    }

    #[test]
    fn test_deterministic() {
        let n = node(&[("aria-label", "Close dialog")], "button", "body > button");
        assert_eq!(synthesize(&n), synthesize(&n));
    }

    #[test]
    fn test_separator_in_value_is_escaped() {
        let n = node(&[("data-testid", "a=b\\c")], "div", "");
        let selector = synthesize(&n);
        assert_eq!(selector, "data-testid=a\\=b\\\\c");

        let (key, value) = split(&selector).unwrap();
        assert_eq!(key, "data-testid");
        assert_eq!(value, "a=b\\c");
    }

    #[test]
    fn test_unescape_trailing_backslash() {
        assert_eq!(unescape_value("abc\\"), "abc\\");
    }
}
