//! Per-selector failure statistics.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::outcome::OutcomeRecord;
use crate::Result;

/// Aggregated failures for one selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefectPattern {
    #[serde(alias = "elementSelector")]
    pub selector: String,
    /// Distinct error messages in first-seen order.
    #[serde(default)]
    pub common_errors: Vec<String>,
    /// Number of failed outcomes recorded for the selector.
    pub frequency: u64,
}

impl DefectPattern {
    fn new(selector: &str) -> Self {
        Self {
            selector: selector.to_string(),
            common_errors: Vec::new(),
            frequency: 0,
        }
    }

    fn absorb(&mut self, failure: &OutcomeRecord) {
        self.frequency += 1;
        if let Some(message) = failure.error() {
            if !self.common_errors.iter().any(|e| e == message) {
                self.common_errors.push(message.to_string());
            }
        }
    }
}

/// Folds failed outcomes into [`DefectPattern`]s.
///
/// Not idempotent: every record passed to [`aggregate`](Self::aggregate) is
/// counted, so each batch must contain only records not aggregated before.
#[derive(Debug, Clone, Default)]
pub struct DefectPatternAggregator {
    patterns: Vec<DefectPattern>,
}

impl DefectPatternAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_patterns(patterns: Vec<DefectPattern>) -> Self {
        Self { patterns }
    }

    /// Fold a batch of new records in. Returns the number of failures counted.
    pub fn aggregate(&mut self, records: &[OutcomeRecord]) -> usize {
        let mut counted = 0;
        for failure in records.iter().filter(|r| !r.success) {
            let index = match self
                .patterns
                .iter()
                .position(|p| p.selector == failure.selector)
            {
                Some(index) => index,
                None => {
                    self.patterns.push(DefectPattern::new(&failure.selector));
                    self.patterns.len() - 1
                }
            };
            self.patterns[index].absorb(failure);
            counted += 1;
        }
        if counted > 0 {
            debug!(
                "Aggregated {} failure(s) into {} pattern(s)",
                counted,
                self.patterns.len()
            );
        }
        counted
    }

    pub fn pattern(&self, selector: &str) -> Option<&DefectPattern> {
        self.patterns.iter().find(|p| p.selector == selector)
    }

    /// Patterns in the order their selectors first failed.
    pub fn patterns(&self) -> &[DefectPattern] {
        &self.patterns
    }

    /// Load persisted patterns. A missing or unreadable file yields no patterns.
    pub async fn load(path: &Path) -> Self {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Could not read defect patterns from {:?}: {}", path, e);
                }
                return Self::new();
            }
        };
        match serde_json::from_str(&content) {
            Ok(patterns) => Self::from_patterns(patterns),
            Err(e) => {
                warn!("Ignoring corrupt defect patterns in {:?}: {}", path, e);
                Self::new()
            }
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&self.patterns)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}
