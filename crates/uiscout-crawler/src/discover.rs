//! Element discovery: enumerate every element kind on a loaded page.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, warn};

use crate::browser::{NodeSnapshot, PageHandle};
use crate::config::DiscoveryConfig;
use crate::element::{ElementDescriptor, ElementKind};
use crate::{Error, Result};

const BUTTON_SELECTORS: &[&str] = &[
    "button",
    "[role=\"button\"]",
    "input[type=\"submit\"]",
    "input[type=\"button\"]",
    "input[type=\"reset\"]",
];

const INPUT_SELECTORS: &[&str] = &[
    "input:not([type=\"submit\"]):not([type=\"button\"]):not([type=\"reset\"]):not([type=\"hidden\"])",
    "[role=\"textbox\"]:not(textarea)",
    "[role=\"searchbox\"]",
];

const LINK_SELECTORS: &[&str] = &["a[href]", "[role=\"link\"]"];

const SELECT_SELECTORS: &[&str] = &["select", "[role=\"combobox\"]", "[role=\"listbox\"]"];

const TEXTAREA_SELECTORS: &[&str] = &["textarea", "[contenteditable=\"true\"]"];

/// Selector expressions queried for a kind, in order.
pub fn selector_expressions(kind: ElementKind) -> &'static [&'static str] {
    match kind {
        ElementKind::Button => BUTTON_SELECTORS,
        ElementKind::Input => INPUT_SELECTORS,
        ElementKind::Link => LINK_SELECTORS,
        ElementKind::Select => SELECT_SELECTORS,
        ElementKind::Textarea => TEXTAREA_SELECTORS,
    }
}

/// Enumerates elements of every kind on a page.
#[derive(Debug, Clone)]
pub struct ElementDiscoverer {
    config: DiscoveryConfig,
}

impl ElementDiscoverer {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    /// Discover and deduplicate the elements on the current page.
    ///
    /// An expression that never matches, or whose query errors, is logged and
    /// skipped; it never stops discovery of the remaining expressions.
    pub async fn discover(&self, page: &dyn PageHandle) -> Vec<ElementDescriptor> {
        let mut found = Vec::new();
        for kind in ElementKind::ALL {
            for expression in selector_expressions(kind) {
                match self.query_expression(page, expression).await {
                    Ok(nodes) => {
                        debug!("{} matched {} node(s) as {}", expression, nodes.len(), kind);
                        found.extend(
                            nodes
                                .iter()
                                .map(|node| ElementDescriptor::from_node(node, kind)),
                        );
                    }
                    Err(e @ Error::Discovery { .. }) => debug!("Skipping: {}", e),
                    Err(e) => warn!("Query for '{}' failed, skipping: {}", expression, e),
                }
            }
        }
        dedup(found)
    }

    async fn query_expression(
        &self,
        page: &dyn PageHandle,
        expression: &str,
    ) -> Result<Vec<NodeSnapshot>> {
        let attempts = self.config.selector_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 && self.config.selector_retry_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.selector_retry_delay_ms))
                    .await;
            }
            match page
                .wait_for_selector(expression, self.config.selector_timeout_ms)
                .await
            {
                Ok(()) => return page.query_nodes(expression).await,
                Err(e) => last_error = e.to_string(),
            }
        }

        Err(Error::Discovery {
            selector: expression.to_string(),
            reason: format!("no match after {} attempt(s): {}", attempts, last_error),
        })
    }
}

/// Drop descriptors whose canonical key was already seen, keeping the first.
pub fn dedup(descriptors: Vec<ElementDescriptor>) -> Vec<ElementDescriptor> {
    let mut seen = HashSet::new();
    descriptors
        .into_iter()
        .filter(|d| seen.insert(d.canonical_key()))
        .collect()
}
