//! Durable outcome history.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::outcome::OutcomeRecord;
use crate::Result;

/// Append-only storage for outcome records.
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    /// Append records to the history.
    async fn append(&self, records: &[OutcomeRecord]) -> Result<()>;

    /// Every record ever appended, oldest first.
    async fn load_all(&self) -> Result<Vec<OutcomeRecord>>;
}

/// In-memory outcome store for testing.
#[derive(Default)]
pub struct MemoryOutcomeStore {
    records: RwLock<Vec<OutcomeRecord>>,
}

impl MemoryOutcomeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OutcomeStore for MemoryOutcomeStore {
    async fn append(&self, records: &[OutcomeRecord]) -> Result<()> {
        self.records.write().await.extend_from_slice(records);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<OutcomeRecord>> {
        Ok(self.records.read().await.clone())
    }
}

/// Outcome store backed by a newline-delimited JSON file.
///
/// Each `append` writes whole lines at the end of the file, so history from
/// earlier runs is never rewritten.
pub struct FileOutcomeStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileOutcomeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl OutcomeStore for FileOutcomeStore {
    async fn append(&self, records: &[OutcomeRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&buf).await?;
        file.flush().await?;

        debug!("Appended {} outcome(s) to {:?}", records.len(), self.path);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<OutcomeRecord>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<OutcomeRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "Skipping unreadable outcome at {:?}:{}: {}",
                    self.path,
                    index + 1,
                    e
                ),
            }
        }
        Ok(records)
    }
}
