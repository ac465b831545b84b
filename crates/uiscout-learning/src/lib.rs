//! # uiscout-learning
//!
//! Learns from the outcomes of generated UI tests. Outcomes are appended to a
//! durable history, failures are folded into per-selector defect patterns,
//! and a small network trained on the history decides which action flow is
//! recommended for each discovered element.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use uiscout_crawler::LearningConfig;
//! use uiscout_learning::{outcome, LearningEngine};
//!
//! # #[tokio::main]
//! # async fn main() -> uiscout_learning::Result<()> {
//! let engine = LearningEngine::open(LearningConfig::default()).await?;
//! let records = outcome::read_records("results.json").await?;
//! engine.analyze_results(records).await?;
//! for insight in engine.insights().await? {
//!     println!("{}: {:.0}%", insight.element, insight.success_rate);
//! }
//! # Ok(())
//! # }
//! ```

mod engine;
pub mod features;
pub mod model;
pub mod outcome;
pub mod patterns;
mod policy;
pub mod store;

pub use engine::{Insight, LearningEngine};
pub use model::{ActionModel, TrainingParams, TrainingReport};
pub use outcome::OutcomeRecord;
pub use patterns::{DefectPattern, DefectPatternAggregator};
pub use policy::{
    ActionPolicy, ActionRecommendation, ActionStep, ActionType, ElementRecommendation, ModelStatus,
};
pub use store::{FileOutcomeStore, MemoryOutcomeStore, OutcomeStore};

/// Result type for learning operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while recording outcomes, aggregating or training.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid outcome record at line {line}: {reason}")]
    Record { line: usize, reason: String },

    #[error("model error: {0}")]
    Model(String),

    #[error("training failed: {0}")]
    Training(String),
}
