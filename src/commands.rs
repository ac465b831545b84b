//! Implementations behind the `uiscout` subcommands.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uiscout_crawler::{crawl_site, Config, CrawlReport, Inventory, LearningConfig};
use uiscout_learning::{
    outcome, ActionPolicy, ElementRecommendation, FileOutcomeStore, Insight, LearningEngine,
    OutcomeStore,
};

/// Crawl `url` and write its inventory to `output` (stdout when `None`).
///
/// Per-page failures are logged and do not fail the command.
pub async fn crawl(
    config: &Config,
    url: &str,
    depth: u32,
    output: Option<&Path>,
    cancel: CancellationToken,
) -> anyhow::Result<CrawlReport> {
    let report = crawl_site(config, url, depth, cancel).await?;

    for failure in &report.failures {
        warn!("Failed to crawl {}: {}", failure.url, failure.error);
    }
    info!(
        "Inventoried {} element(s) on {} page(s)",
        report.element_count(),
        report.inventory.len()
    );

    write_json(&report.inventory, output).await?;
    Ok(report)
}

/// Ingest a results file, update defect patterns, retrain, and return insights.
pub async fn learn(config: &LearningConfig, results: &Path) -> anyhow::Result<Vec<Insight>> {
    let records = outcome::read_records(results)
        .await
        .with_context(|| format!("reading outcomes from {}", results.display()))?;
    info!("Read {} outcome(s) from {}", records.len(), results.display());

    let engine = LearningEngine::open(config.clone()).await?;
    let training = engine.analyze_results(records).await?;
    match training.await {
        Ok(Ok(report)) => info!(
            "Model trained on {} outcome(s), final loss {:.4}",
            report.train_samples, report.final_loss
        ),
        Ok(Err(e)) => warn!("Model not updated: {}", e),
        Err(e) => warn!("Training task failed: {}", e),
    }

    Ok(engine.insights().await?)
}

/// Recommend action flows for every element of a saved inventory.
pub async fn recommend(
    config: &LearningConfig,
    inventory_path: &Path,
) -> anyhow::Result<BTreeMap<String, Vec<ElementRecommendation>>> {
    let json = tokio::fs::read_to_string(inventory_path)
        .await
        .with_context(|| format!("reading inventory from {}", inventory_path.display()))?;
    let inventory = parse_inventory(&json)?;

    let policy = ActionPolicy::new(config.threshold);
    let outcomes = config.outcomes_path();
    match FileOutcomeStore::new(outcomes.clone()).load_all().await {
        Ok(history) => policy.set_history(&history),
        Err(e) => warn!("Ignoring outcome history in {}: {}", outcomes.display(), e),
    }
    // One-shot command: wait for the model rather than racing it.
    if let Err(e) = policy.load_in_background(config.model_path()).await {
        warn!("Model loading task failed: {}", e);
    }

    Ok(policy.recommend_all(&inventory))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InventoryFile {
    Report { inventory: Inventory },
    Bare(Inventory),
}

/// Accept either a bare inventory or a full crawl report.
pub fn parse_inventory(json: &str) -> anyhow::Result<Inventory> {
    let file: InventoryFile = serde_json::from_str(json).context("parsing inventory")?;
    Ok(match file {
        InventoryFile::Report { inventory } => inventory,
        InventoryFile::Bare(inventory) => inventory,
    })
}

/// Pretty JSON to a file, or to stdout.
pub async fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, json)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}
