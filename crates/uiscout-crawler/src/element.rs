//! Element descriptors: the unit of the per-page inventory.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::browser::NodeSnapshot;
use crate::{canonical, selector};

/// Inventory handed to the page-object and test generators, keyed by normalized URL.
pub type Inventory = BTreeMap<String, Vec<ElementDescriptor>>;

/// Coarse UI role of a discovered element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Button,
    Input,
    Link,
    Select,
    Textarea,
}

impl ElementKind {
    /// Discovery order.
    pub const ALL: [ElementKind; 5] = [
        ElementKind::Button,
        ElementKind::Input,
        ElementKind::Link,
        ElementKind::Select,
        ElementKind::Textarea,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Button => "button",
            Self::Input => "input",
            Self::Link => "link",
            Self::Select => "select",
            Self::Textarea => "textarea",
        }
    }

    /// Interactions a generated test may exercise on this kind.
    pub fn interactions(&self) -> &'static [Interaction] {
        match self {
            Self::Button => &[Interaction::Click, Interaction::Hover, Interaction::DoubleClick],
            Self::Input | Self::Textarea => {
                &[Interaction::Type, Interaction::Fill, Interaction::Clear]
            }
            Self::Link => &[Interaction::Click, Interaction::VerifyNavigation],
            Self::Select => &[],
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A capability a generated test can drive on an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Interaction {
    Click,
    Hover,
    DoubleClick,
    Type,
    Fill,
    Clear,
    VerifyNavigation,
}

/// One discovered element.
///
/// Built once by [`ElementDescriptor::from_node`] and never mutated afterwards.
/// Its identity is [`canonical_key`](Self::canonical_key), derived from the
/// cleaned selector and the kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    /// Stable id, identical across runs for the same selector, kind and attributes.
    pub id: String,
    /// Canonical selector, `attr=value` or `css=<structural path>`.
    pub selector: String,
    pub kind: ElementKind,
    pub attributes: BTreeMap<String, String>,
    /// Trimmed text content.
    #[serde(default)]
    pub text: String,
    pub interactions: Vec<Interaction>,
}

impl ElementDescriptor {
    /// Build a descriptor for a DOM node matched as `kind`.
    pub fn from_node(node: &NodeSnapshot, kind: ElementKind) -> Self {
        let selector = canonical::canonicalize(&selector::synthesize(node));
        let id = canonical::generate_id(&selector, kind, &node.attributes);
        Self {
            id,
            selector,
            kind,
            attributes: node.attributes.clone(),
            text: node.text.trim().to_string(),
            interactions: kind.interactions().to_vec(),
        }
    }

    /// Deduplication identity within one page.
    pub fn canonical_key(&self) -> String {
        canonical::canonical_key(&self.selector, self.kind)
    }
}

impl fmt::Display for ElementDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}> {}", self.kind, self.selector)?;
        if !self.text.is_empty() {
            write!(f, " \"{}\"", self.text)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(attrs: &[(&str, &str)], text: &str) -> NodeSnapshot {
        NodeSnapshot {
            tag: "button".into(),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            text: text.into(),
            path: "body > form > button:nth-of-type(2)".into(),
        }
    }

    #[test]
    fn test_interactions_table() {
        assert_eq!(
            ElementKind::Button.interactions(),
            &[Interaction::Click, Interaction::Hover, Interaction::DoubleClick]
        );
        assert_eq!(
            ElementKind::Input.interactions(),
            ElementKind::Textarea.interactions()
        );
        assert_eq!(
            ElementKind::Link.interactions(),
            &[Interaction::Click, Interaction::VerifyNavigation]
        );
        assert!(ElementKind::Select.interactions().is_empty());
    }

    #[test]
    fn test_from_node_prefers_testid() {
        let el = ElementDescriptor::from_node(
            &node(&[("id", "submit"), ("data-testid", "checkout")], "  Pay now \n"),
            ElementKind::Button,
        );
        assert_eq!(el.selector, "data-testid=checkout");
        assert_eq!(el.text, "Pay now");
        assert_eq!(el.interactions.len(), 3);
        assert_eq!(el.canonical_key(), "button|data-testid=checkout");
    }

    #[test]
    fn test_from_node_id_is_stable() {
        let a = ElementDescriptor::from_node(&node(&[("id", "submit")], ""), ElementKind::Button);
        let b = ElementDescriptor::from_node(&node(&[("id", "submit")], ""), ElementKind::Button);
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.len(), 40);
    }

    #[test]
    fn test_serialized_shape() {
        let el = ElementDescriptor::from_node(&node(&[("name", "q")], ""), ElementKind::Input);
        let json = serde_json::to_value(&el).unwrap();
        assert_eq!(json["kind"], "input");
        assert_eq!(json["selector"], "name=q");
        assert_eq!(json["interactions"][0], "type");
    }

    #[test]
    fn test_display() {
        let el = ElementDescriptor::from_node(&node(&[("id", "go")], "Go"), ElementKind::Button);
        assert_eq!(el.to_string(), "<button> id=go \"Go\"");
    }
}
