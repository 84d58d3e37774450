//! Replicant node agent binary.
//!
//! `replicant init` runs once at boot to bring the local database up as
//! primary or replica. `replicant promote` turns a replica into the primary.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use replicant_coordinator::{bootstrap, ClusterConfig, CoordinationMetrics, SharedMetrics};

/// Replicant CLI
#[derive(Parser, Debug)]
#[command(name = "replicant")]
#[command(about = "Role coordination for replicated database nodes")]
struct Args {
    /// JSON configuration file; REPLICANT_* variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Write Prometheus metrics to this file on exit
    #[arg(long, global = true)]
    metrics_out: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve this node's role, prepare it and start the database
    Init {
        /// Abandon the run after this many seconds
        #[arg(long)]
        deadline: Option<u64>,
    },
    /// Promote this replica to primary
    Promote {
        /// Promote even if the current primary is alive
        #[arg(long)]
        force: bool,
    },
}

const EXIT_FAILED: u8 = 1;
const EXIT_REFUSED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::from(EXIT_FAILED);
        }
    };

    init_logging(&config, args.log_json);

    let metrics: SharedMetrics = Arc::new(CoordinationMetrics::new());
    let result = match args.command {
        Command::Init { deadline } => init(&config, metrics.clone(), deadline).await,
        Command::Promote { force } => promote(&config, metrics.clone(), force).await,
    };

    report_metrics(&metrics, args.metrics_out.as_deref());

    match result {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Command failed");
            eprintln!("FAILED: {:#}", e);
            ExitCode::from(EXIT_FAILED)
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<ClusterConfig> {
    let config = match path {
        Some(path) => {
            let mut config = ClusterConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?;
            config.apply_overrides(|key| std::env::var(key).ok());
            config
        }
        None => ClusterConfig::from_env(),
    };

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    Ok(config)
}

fn init_logging(config: &ClusterConfig, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

async fn init(
    config: &ClusterConfig,
    metrics: SharedMetrics,
    deadline: Option<u64>,
) -> anyhow::Result<ExitCode> {
    let identity = bootstrap::load_identity(config).await?;
    let directory = bootstrap::connect_directory(config).await?;
    let coordinator = bootstrap::coordinator(config, identity, directory, metrics);

    info!(run_id = %coordinator.run_id(), name = %coordinator.primary_name(), "Starting coordination run");

    let shutdown = async move {
        let interrupted = async {
            // Without a signal handler only the deadline can cancel.
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        match deadline {
            Some(secs) => tokio::select! {
                _ = interrupted => info!("Interrupted"),
                _ = tokio::time::sleep(Duration::from_secs(secs)) => info!("Deadline reached"),
            },
            None => {
                interrupted.await;
                info!("Interrupted");
            }
        }
    };

    let role = coordinator.initialise_until(shutdown).await?;
    println!("STARTED {}", role);
    Ok(ExitCode::SUCCESS)
}

async fn promote(
    config: &ClusterConfig,
    metrics: SharedMetrics,
    force: bool,
) -> anyhow::Result<ExitCode> {
    let identity = bootstrap::load_identity(config).await?;
    let directory = bootstrap::connect_directory(config).await?;
    let guard = bootstrap::promotion_guard(config, identity, directory, metrics)?;

    let report = guard.promote(force).await?;
    println!("{}", report);

    if report.decision.is_promoted() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_REFUSED))
    }
}

fn report_metrics(metrics: &CoordinationMetrics, out: Option<&std::path::Path>) {
    let snapshot = metrics.snapshot();
    match serde_json::to_string(&snapshot) {
        Ok(json) => info!(metrics = %json, "Metrics at exit"),
        Err(e) => error!(error = %e, "Failed to serialize metrics"),
    }

    if let Some(path) = out {
        if let Err(e) = std::fs::write(path, metrics.to_prometheus()) {
            error!(path = %path.display(), error = %e, "Failed to write metrics");
        }
    }
}
