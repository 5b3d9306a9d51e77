mod cli;
mod commands;
mod config;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use hazrisk_core::execution::LogLevel;
use hazrisk_engine::Orchestrator;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::CliConfig;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let args = cli::Cli::parse();

    // --- Tracing ---
    init_tracing(args.log_level);

    // --- Configuration ---
    let config = CliConfig::from_env()?.with_no_distribute(args.no_distribute);
    tracing::debug!(
        database_url = %config.database_url,
        mode = ?config.mode,
        concurrency = config.concurrency,
        owner = %config.owner,
        "Loaded configuration",
    );

    // --- Database ---
    let pool = hazrisk_db::create_pool(&config.database_url, config.max_connections)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_url))?;
    hazrisk_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    hazrisk_db::run_migrations(&pool)
        .await
        .context("Failed to apply database migrations")?;

    let orchestrator = Orchestrator::new(pool.clone(), config.orchestrator_config(args.log_level));
    let code = commands::dispatch(&orchestrator, &config, args).await;
    pool.close().await;
    code
}

/// Log to stderr. `RUST_LOG` overrides the level given on the command line.
fn init_tracing(level: LogLevel) {
    let default_filter = ["hazrisk", "hazrisk_core", "hazrisk_db", "hazrisk_events", "hazrisk_engine"]
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",");

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
