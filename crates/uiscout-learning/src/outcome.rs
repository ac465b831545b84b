//! Outcome records produced by running generated tests, and their ingestion.

use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{Error, Result};

/// The result of one automated interaction with one element.
///
/// Append-only: records are never modified once written to history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    pub success: bool,
    #[serde(alias = "elementSelector")]
    pub selector: String,
    pub action: String,
    #[serde(default, alias = "error_message", skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// RFC 3339 on output. Input also accepts epoch milliseconds.
    #[serde(default = "Utc::now", deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl OutcomeRecord {
    pub fn passed(selector: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            success: true,
            selector: selector.into(),
            action: action.into(),
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(
        selector: impl Into<String>,
        action: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            selector: selector.into(),
            action: action.into(),
            error_message: Some(error_message.into()),
            timestamp: Utc::now(),
        }
    }

    /// Error message, treating an empty string as absent.
    pub fn error(&self) -> Option<&str> {
        self.error_message.as_deref().filter(|m| !m.is_empty())
    }
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(DateTime<Utc>),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Text(ts) => Ok(ts),
        Raw::Millis(ms) => Utc
            .timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {ms}"))),
    }
}

/// Parse outcome records from a JSON array or newline-delimited JSON.
pub fn parse_records(content: &str) -> Result<Vec<OutcomeRecord>> {
    let trimmed = content.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }

    let mut records = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|e| Error::Record {
            line: index + 1,
            reason: e.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Read outcome records from a results file.
pub async fn read_records<P: AsRef<Path>>(path: P) -> Result<Vec<OutcomeRecord>> {
    let content = tokio::fs::read_to_string(path.as_ref()).await?;
    parse_records(&content)
}
