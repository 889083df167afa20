//! Builder daemon: finalises jobs whose tasks have all reached a terminal
//! status.
//!
//! Runs a single tick with `--once`, otherwise ticks forever at the
//! `--every` cadence. The database DSN comes from `--dsn` or the
//! `DATABASE_URL` environment variable.

use clap::Parser;
use foreman::queue::adapters::postgres::{PostgresQueueRepository, create_pool, mask_dsn};
use foreman::queue::services::BuilderService;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Foreman builder daemon.
#[derive(Parser, Debug)]
#[command(name = "foreman-builder", about = "Foreman job finalisation daemon")]
struct Args {
    /// Run a single tick and exit
    #[arg(long)]
    once: bool,

    /// Seconds between ticks
    #[arg(long, default_value = "2")]
    every: u64,

    /// Database DSN
    #[arg(long, env = "DATABASE_URL")]
    dsn: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let pool = create_pool(&args.dsn)?;
    let service = BuilderService::new(Arc::new(PostgresQueueRepository::new(pool)));

    info!(dsn = %mask_dsn(&args.dsn), "builder starting");

    if args.once {
        service.tick().await?;
        return Ok(());
    }

    let interval = Duration::from_secs(args.every.max(1));
    loop {
        if let Err(err) = service.tick().await {
            error!(error = %err, "builder tick failed");
        }
        tokio::time::sleep(interval).await;
    }
}
