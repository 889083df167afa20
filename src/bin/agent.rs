//! Agent daemon: claims tasks for one service and executes them under a
//! renewable lease.
//!
//! Drains the service named by `--service` as the node identity given by
//! `--node` (a generated identity when omitted). Runs a single
//! claim/execute pass with `--once`, otherwise polls forever, sleeping for
//! `--every` seconds whenever the claim comes back empty. The built-in
//! handler logs each task and succeeds; deployments register their own
//! [`TaskHandler`](foreman::queue::ports::TaskHandler) implementations.

use clap::Parser;
use foreman::queue::adapters::postgres::{PostgresQueueRepository, create_pool, mask_dsn};
use foreman::queue::domain::{NodeId, ServiceName};
use foreman::queue::services::{AgentConfig, AgentService, EchoHandler, HandlerRegistry};
use mockable::DefaultClock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Foreman agent daemon.
#[derive(Parser, Debug)]
#[command(name = "foreman-agent", about = "Foreman task execution agent")]
struct Args {
    /// Service whose tasks this agent executes
    #[arg(long)]
    service: String,

    /// Node identity used for lease attribution; generated when omitted
    #[arg(long)]
    node: Option<String>,

    /// Maximum tasks claimed per pass
    #[arg(long, default_value = "1")]
    limit: u32,

    /// Lease duration in seconds
    #[arg(long, default_value = "60")]
    lease_secs: u64,

    /// Run a single pass and exit
    #[arg(long)]
    once: bool,

    /// Seconds to sleep between empty passes
    #[arg(long, default_value = "1")]
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

    let service = ServiceName::new(args.service)?;
    let node = NodeId::new(
        args.node
            .unwrap_or_else(|| format!("agent-{}", Uuid::new_v4())),
    )?;

    let pool = create_pool(&args.dsn)?;
    let repository = Arc::new(PostgresQueueRepository::new(pool));
    let handlers = HandlerRegistry::new().with_handler(service.clone(), Arc::new(EchoHandler));
    let config = AgentConfig::new(service, node)
        .with_claim_limit(args.limit)
        .with_lease_duration(Duration::from_secs(args.lease_secs.max(1)))
        .with_poll_interval(Duration::from_secs(args.every.max(1)));

    info!(
        dsn = %mask_dsn(&args.dsn),
        service = %config.service(),
        node = %config.node(),
        "agent starting"
    );

    let agent = AgentService::new(repository, Arc::new(DefaultClock), handlers, config);

    if args.once {
        agent.run_once().await?;
        return Ok(());
    }

    if let Err(err) = agent.run().await {
        error!(error = %err, "agent stopped");
        return Err(err.into());
    }
    Ok(())
}
