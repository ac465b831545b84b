//! # uiscout-crawler
//!
//! Crawls a site, discovers the interactive elements on every reachable page
//! and builds a per-URL inventory of them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use uiscout_crawler::{crawl_site, Config};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> uiscout_crawler::Result<()> {
//! let config = Config::load("uiscout.yaml")?;
//! let report = crawl_site(&config, "https://example.com", 2, CancellationToken::new()).await?;
//! for (url, elements) in &report.inventory {
//!     println!("{url}: {} elements", elements.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod canonical;
mod config;
pub mod crawl;
pub mod discover;
mod element;
pub mod navigation;
pub mod selector;

#[cfg(test)]
pub(crate) mod mock;

pub use browser::{BrowserSession, EokaSession, NodeSnapshot, PageHandle};
pub use config::{
    BrowserConfig, Config, CrawlSettings, DiscoveryConfig, LearningConfig, NavigationConfig,
    Viewport,
};
pub use crawl::{
    crawl_site, crawl_with_session, CrawlOrchestrator, CrawlPhase, CrawlReport, PageFailure,
};
pub use discover::ElementDiscoverer;
pub use element::{ElementDescriptor, ElementKind, Interaction, Inventory};
pub use navigation::{NavigationController, ReadyReport};

/// Result type for crawler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or running a crawl.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("browser error: {0}")]
    Browser(#[from] eoka::Error),

    #[error("could not start browser session: {0}")]
    SessionInit(String),

    #[error("navigation to {url} failed after {attempts} attempt(s): {last_error}")]
    Navigation {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("discovery failed for '{selector}': {reason}")]
    Discovery { selector: String, reason: String },
}
