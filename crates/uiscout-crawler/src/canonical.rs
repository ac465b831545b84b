//! Canonical selectors and stable element ids.

use std::borrow::Cow;
use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use sha1::{Digest, Sha1};

use crate::element::ElementKind;
use crate::selector::{SEPARATOR, STRUCTURAL_KEY};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static COMBINATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*>\s*").unwrap());

/// Strip formatting noise from a selector.
///
/// Collapses whitespace runs, trims around the `=` separator, lowercases the
/// key and, for structural selectors, normalizes child combinators to ` > `.
/// Idempotent.
pub fn canonicalize(selector: &str) -> String {
    let collapsed = WHITESPACE.replace_all(selector.trim(), " ");
    let Some((key, value)) = collapsed.split_once(SEPARATOR) else {
        return collapsed.into_owned();
    };

    let key = key.trim().to_ascii_lowercase();
    let value = value.trim();
    let value = if key == STRUCTURAL_KEY {
        COMBINATOR.replace_all(value, " > ")
    } else {
        Cow::Borrowed(value)
    };
    format!("{key}{SEPARATOR}{value}")
}

/// Deduplication key for a cleaned selector of a given kind.
pub fn canonical_key(clean_selector: &str, kind: ElementKind) -> String {
    format!("{}|{}", kind.as_str(), clean_selector)
}

/// Stable id for an element, hex-encoded SHA-1 over kind, selector and attributes.
///
/// Attributes are hashed in key order so map ordering never changes the id.
pub fn generate_id(
    clean_selector: &str,
    kind: ElementKind,
    attributes: &BTreeMap<String, String>,
) -> String {
    let mut hasher = Sha1::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(clean_selector.as_bytes());
    for (name, value) in attributes {
        hasher.update([0u8]);
        hasher.update(name.as_bytes());
        hasher.update([b'=']);
        hasher.update(value.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
