//! Monitor Runner CLI
//!
//! Runs a scheduled alerting monitor's pipeline once or on a repeating
//! interval against a search/index cluster, dispatching actions through
//! webhook, Slack, or SNS destinations.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use monitor_config::{RunnerSettings, SettingsWatcher, StaticConfig};
use monitor_runner::cluster::HttpClusterClient;
use monitor_runner::model::Monitor;
use monitor_runner::runner::{run_monitor_loop, MonitorRunner};
use notify::{DestinationConfig, InMemoryDestinationRegistry};
use tracing::info;

/// Monitor Runner: evaluates alerting monitors and dispatches notifications
#[derive(Parser)]
#[command(name = "monitor-runner")]
#[command(about = "Evaluates alerting monitors and dispatches notifications")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base URL of the search/index cluster. Overrides `MONITOR_CLUSTER_URL`.
    #[arg(long, global = true)]
    cluster_url: Option<String>,

    /// Path to a JSON array of destination configurations.
    #[arg(long, global = true)]
    destinations_file: Option<PathBuf>,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a monitor definition once over the last `--lookback-secs`.
    Run {
        /// Path to a JSON monitor definition.
        monitor_file: PathBuf,

        /// Size of the evaluation window, in seconds, ending now.
        #[arg(long, default_value = "60")]
        lookback_secs: i64,

        /// Preview mode: skip alert persistence and action publishes.
        #[arg(long)]
        dryrun: bool,
    },
    /// Run a monitor definition repeatedly every `--interval-secs`.
    Watch {
        /// Path to a JSON monitor definition.
        monitor_file: PathBuf,

        /// Interval between runs, in seconds.
        #[arg(long, default_value = "60")]
        interval_secs: u64,
    },
}

fn load_monitor(path: &PathBuf) -> Result<Monitor> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading monitor definition at {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("parsing monitor definition at {}", path.display()))
}

fn build_registry(path: Option<&PathBuf>) -> Result<InMemoryDestinationRegistry> {
    let registry = InMemoryDestinationRegistry::new();
    let Some(path) = path else {
        return Ok(registry);
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading destinations file at {}", path.display()))?;
    let configs: Vec<DestinationConfig> = serde_json::from_str(&contents)
        .with_context(|| format!("parsing destinations file at {}", path.display()))?;
    for config in configs {
        registry.insert(config);
    }
    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let mut config = StaticConfig::from_env();
    if let Some(url) = &cli.cluster_url {
        config.cluster_url = url.clone();
    }

    let cluster = Arc::new(HttpClusterClient::new(config.cluster_url.clone()));
    let settings = Arc::new(SettingsWatcher::new(RunnerSettings::default()));
    let registry = Arc::new(build_registry(cli.destinations_file.as_ref())?);
    let runner = Arc::new(MonitorRunner::new(cluster, config, settings, registry));

    match cli.command {
        Commands::Run { monitor_file, lookback_secs, dryrun } => {
            let monitor = load_monitor(&monitor_file)?;
            let period_end = chrono::Utc::now();
            let period_start = period_end - chrono::Duration::seconds(lookback_secs);
            let result = runner.run_monitor(&monitor, period_start, period_end, dryrun).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Watch { monitor_file, interval_secs } => {
            let monitor = load_monitor(&monitor_file)?;
            let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
            info!(monitor = %monitor.name, interval_secs, "starting monitor watch loop");

            let loop_handle = tokio::spawn(run_monitor_loop(
                runner,
                monitor,
                std::time::Duration::from_secs(interval_secs),
                stop_rx,
            ));

            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            info!("shutdown signal received");
            let _ = stop_tx.send(true);
            let _ = loop_handle.await;
        }
    }

    Ok(())
}
