use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uiscout::commands;
use uiscout_crawler::Config;

#[derive(Parser)]
#[command(name = "uiscout")]
#[command(about = "Crawl a site, inventory its UI elements, learn from test outcomes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (defaults apply when it does not exist)
    #[arg(short, long, global = true, default_value = "uiscout.yaml")]
    config: PathBuf,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl a site and write its element inventory as JSON
    Crawl {
        /// Start URL
        url: String,

        /// Link levels to follow (overrides config)
        #[arg(short, long)]
        depth: Option<u32>,

        /// Pages crawled in parallel (overrides config)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Run in headless mode (overrides config)
        #[arg(long)]
        headless: bool,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Record test outcomes, update defect patterns and retrain the model
    Learn {
        /// Results file: JSON array or newline-delimited JSON of outcomes
        results: PathBuf,

        /// Where to write insights (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Recommend action flows for a saved inventory
    Recommend {
        /// Inventory or crawl report JSON
        inventory: PathBuf,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };

    // RUST_LOG takes precedence over -v/-q
    let builder = FmtSubscriber::builder()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact();
    match EnvFilter::try_from_default_env() {
        Ok(filter) => builder.with_env_filter(filter).init(),
        Err(_) => builder.with_max_level(level).init(),
    }

    let mut config = Config::load_or_default(&cli.config)?;

    match cli.command {
        Command::Crawl {
            url,
            depth,
            concurrency,
            headless,
            output,
        } => {
            if headless {
                config.browser.headless = true;
            }
            if let Some(concurrency) = concurrency {
                config.crawl.max_concurrency = concurrency.max(1);
            }
            let depth = depth.unwrap_or(config.crawl.max_depth);

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, finishing in-flight pages");
                    on_signal.cancel();
                }
            });

            let report = commands::crawl(&config, &url, depth, output.as_deref(), cancel).await?;
            if !report.failures.is_empty() {
                eprintln!(
                    "{} page(s) could not be crawled (see log for details)",
                    report.failures.len()
                );
            }
        }
        Command::Learn { results, output } => {
            let insights = commands::learn(&config.learning, &results).await?;
            commands::write_json(&insights, output.as_deref()).await?;
        }
        Command::Recommend { inventory, output } => {
            let recommendations = commands::recommend(&config.learning, &inventory).await?;
            commands::write_json(&recommendations, output.as_deref()).await?;
        }
    }

    Ok(())
}
