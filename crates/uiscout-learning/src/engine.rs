//! The learning loop: record outcomes, aggregate defects, retrain, advise.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uiscout_crawler::LearningConfig;

use crate::model::{TrainingParams, TrainingReport};
use crate::outcome::OutcomeRecord;
use crate::patterns::{DefectPattern, DefectPatternAggregator};
use crate::policy::ActionPolicy;
use crate::store::{FileOutcomeStore, OutcomeStore};
use crate::Result;

/// Failure count above which a selector is flagged as needing attention.
const FREQUENT_FAILURES: u64 = 5;
const NOT_FOUND: &str = "Element not found";

/// Per-selector summary of the outcome history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub element: String,
    /// Percentage of successful outcomes, 0 to 100.
    pub success_rate: f64,
    pub suggestions: Vec<String>,
}

pub struct LearningEngine {
    config: LearningConfig,
    store: Arc<dyn OutcomeStore>,
    patterns: Mutex<DefectPatternAggregator>,
    policy: ActionPolicy,
}

impl LearningEngine {
    /// Open the persisted state under `config.data_dir`.
    ///
    /// Waits for the persisted model, so the next training run updates it
    /// instead of starting from fresh weights.
    pub async fn open(config: LearningConfig) -> Result<Self> {
        let store: Arc<dyn OutcomeStore> =
            Arc::new(FileOutcomeStore::new(config.outcomes_path()));
        let engine = Self::with_store(config, store).await?;
        if let Err(e) = engine
            .policy
            .load_in_background(engine.config.model_path())
            .await
        {
            warn!("Model loading task failed: {}", e);
        }
        Ok(engine)
    }

    /// Build an engine over any outcome store. No model is loaded.
    pub async fn with_store(
        config: LearningConfig,
        store: Arc<dyn OutcomeStore>,
    ) -> Result<Self> {
        let patterns = DefectPatternAggregator::load(&config.patterns_path()).await;
        let policy = ActionPolicy::new(config.threshold);
        policy.set_history(&store.load_all().await?);
        debug!(
            "Learning state opened with {} defect pattern(s)",
            patterns.patterns().len()
        );

        Ok(Self {
            config,
            store,
            patterns: Mutex::new(patterns),
            policy,
        })
    }

    pub fn policy(&self) -> &ActionPolicy {
        &self.policy
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    /// Record a batch of new outcomes and update everything derived from them.
    ///
    /// Outcomes are appended to history, folded into the defect patterns
    /// (saved best-effort; a failed save keeps the in-memory patterns), and
    /// the model is retrained on the full history in the background. The
    /// returned handle resolves when training finishes; dropping it leaves
    /// training running.
    pub async fn analyze_results(
        &self,
        records: Vec<OutcomeRecord>,
    ) -> Result<JoinHandle<Result<TrainingReport>>> {
        self.store.append(&records).await?;

        {
            let mut patterns = self.patterns.lock().await;
            let failures = patterns.aggregate(&records);
            info!("Recorded {} outcome(s), {} failure(s)", records.len(), failures);
            let path = self.config.patterns_path();
            if let Err(e) = patterns.save(&path).await {
                warn!("Failed to save defect patterns to {:?}: {}", path, e);
            }
        }

        let history = self.store.load_all().await?;
        Ok(self.policy.train_in_background(
            history,
            TrainingParams::from_config(&self.config),
            Some(self.config.model_path()),
        ))
    }

    /// Snapshot of the current defect patterns.
    pub async fn defect_patterns(&self) -> Vec<DefectPattern> {
        self.patterns.lock().await.patterns().to_vec()
    }

    /// Success rate and suggestions for every selector in the history.
    pub async fn insights(&self) -> Result<Vec<Insight>> {
        let history = self.store.load_all().await?;
        let patterns = self.patterns.lock().await;

        // (selector, successes, total) in first-seen order
        let mut stats: Vec<(String, u64, u64)> = Vec::new();
        for record in &history {
            let index = match stats.iter().position(|(s, _, _)| *s == record.selector) {
                Some(index) => index,
                None => {
                    stats.push((record.selector.clone(), 0, 0));
                    stats.len() - 1
                }
            };
            stats[index].2 += 1;
            if record.success {
                stats[index].1 += 1;
            }
        }

        Ok(stats
            .into_iter()
            .map(|(element, successes, total)| {
                let suggestions = patterns
                    .pattern(&element)
                    .map(suggestions_for)
                    .unwrap_or_default();
                Insight {
                    success_rate: successes as f64 / total as f64 * 100.0,
                    suggestions,
                    element,
                }
            })
            .collect())
    }
}

fn suggestions_for(pattern: &DefectPattern) -> Vec<String> {
    let mut suggestions = Vec::new();
    if pattern.frequency > FREQUENT_FAILURES {
        suggestions.push("Update selector or fix element interaction.".to_string());
    }
    if pattern.common_errors.iter().any(|e| e == NOT_FOUND) {
        suggestions.push("Add retry logic or improve selector.".to_string());
    }
    suggestions
}
