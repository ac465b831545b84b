//! Numeric encoding of outcomes and elements for the action model.

use std::collections::HashMap;

use uiscout_crawler::ElementDescriptor;

use crate::outcome::OutcomeRecord;

/// Length of every feature vector.
pub const FEATURE_COUNT: usize = 3;

/// Lengths are divided by this so typical values stay near the unit range.
const LENGTH_SCALE: f32 = 64.0;

pub type Features = [f32; FEATURE_COUNT];

/// `[selector length, action == "click", error message length]`, lengths scaled.
pub fn encode(selector: &str, action: &str, error_len: usize) -> Features {
    [
        selector.chars().count() as f32 / LENGTH_SCALE,
        if action == "click" { 1.0 } else { 0.0 },
        error_len as f32 / LENGTH_SCALE,
    ]
}

pub fn encode_record(record: &OutcomeRecord) -> Features {
    encode(
        &record.selector,
        &record.action,
        record.error().map_or(0, |e| e.chars().count()),
    )
}

/// Most recent error message length per selector, from outcome history.
#[derive(Debug, Clone, Default)]
pub struct ErrorHistory {
    latest: HashMap<String, usize>,
}

impl ErrorHistory {
    pub fn from_records(records: &[OutcomeRecord]) -> Self {
        let mut latest = HashMap::new();
        for record in records {
            if let Some(error) = record.error() {
                latest.insert(record.selector.clone(), error.chars().count());
            }
        }
        Self { latest }
    }

    /// 0 when the selector never failed with a message.
    pub fn error_len(&self, selector: &str) -> usize {
        self.latest.get(selector).copied().unwrap_or(0)
    }
}

/// Encode an element for the action it would be driven with.
pub fn encode_element(
    element: &ElementDescriptor,
    action: &str,
    errors: &ErrorHistory,
) -> Features {
    encode(&element.selector, action, errors.error_len(&element.selector))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_record() {
        let record = OutcomeRecord::failed("id=submit", "click", "Element not found");
        let f = encode_record(&record);
        assert!((f[0] - 9.0 / 64.0).abs() < 1e-6);
        assert_eq!(f[1], 1.0);
        assert!((f[2] - 17.0 / 64.0).abs() < 1e-6);
    }

    #[test]
    fn test_non_click_action_flag() {
        let f = encode_record(&OutcomeRecord::passed("name=q", "fill"));
        assert_eq!(f[1], 0.0);
        assert_eq!(f[2], 0.0);
    }

    #[test]
    fn test_error_history_keeps_latest() {
        let history = ErrorHistory::from_records(&[
            OutcomeRecord::failed("id=a", "click", "abc"),
            OutcomeRecord::passed("id=a", "click"),
            OutcomeRecord::failed("id=a", "click", "abcdef"),
        ]);
        assert_eq!(history.error_len("id=a"), 6);
        assert_eq!(history.error_len("id=b"), 0);
    }
}
