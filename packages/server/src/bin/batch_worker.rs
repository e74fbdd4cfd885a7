//! One-shot batch drain, for cron-style schedulers.
//!
//! Processes a single bounded batch from the job queue (or the analytics
//! queue with `--analytics`), prints the summary as JSON and exits.

use anyhow::{Context, Result};
use clap::Parser;
use server_core::config::Config;
use server_core::domains::jobs::{AnalyticsBatchConsumer, QueueConsumer};
use server_core::kernel::ServerDeps;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "batch_worker")]
#[command(about = "Drain one batch from a pipeline queue")]
struct Cli {
    /// Queue to read from (defaults to the configured job or analytics queue)
    #[arg(long)]
    queue: Option<String>,

    /// Maximum messages to read, clamped to 1..=500
    #[arg(long)]
    batch_size: Option<i64>,

    /// Drain analytics rows instead of jobs
    #[arg(long)]
    analytics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays parseable JSON
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    let deps = ServerDeps::from_config(pool, &config)?;
    let batch_size = cli.batch_size.unwrap_or(deps.settings.batch_size);

    let output = if cli.analytics {
        let queue = cli
            .queue
            .unwrap_or_else(|| deps.settings.analytics_queue_name.clone());
        let summary = AnalyticsBatchConsumer::new(deps)
            .drain_batch(&queue, batch_size)
            .await
            .with_context(|| format!("Failed to drain analytics queue '{}'", queue))?;
        serde_json::to_string_pretty(&summary)?
    } else {
        let queue = cli
            .queue
            .unwrap_or_else(|| deps.settings.job_queue_name.clone());
        let summary = QueueConsumer::standard(deps)
            .drain_batch(&queue, batch_size)
            .await
            .with_context(|| format!("Failed to drain job queue '{}'", queue))?;
        serde_json::to_string_pretty(&summary)?
    };

    println!("{}", output);
    Ok(())
}
