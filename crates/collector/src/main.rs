//! Sync Collector - time-sync telemetry collection
//!
//! Runs the selected collectors against a cluster's PTP daemon pod, or
//! against the local machine, for a fixed duration and writes every
//! record to stdout or a file.

use anyhow::{bail, Context, Result};
use clap::Parser;
use collector_lib::{
    collector::{ContextConfig, ALL_KEYS},
    runner::ALL_COLLECTORS,
    session::{KubeProvider, LocalContainer},
    Callback, CollectorArgs, CollectorRunner, FileCallback, Registry, RunConfig, RunTarget,
    StdoutCallback,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const COLLECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Collect time-sync telemetry from a cluster or the local machine
#[derive(Debug, Parser)]
#[command(name = "sync-collector", version)]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the kubeconfig of the target cluster
    #[arg(short, long)]
    kubeconfig: Option<PathBuf>,

    /// Name of the PTP interface
    #[arg(short, long)]
    interface: Option<String>,

    /// Total run time, such as "300s", "1.5h" or "2h45m"
    #[arg(short, long, value_parser = config::parse_duration)]
    duration: Option<Duration>,

    /// Poll interval in seconds
    #[arg(short, long)]
    rate: Option<u64>,

    /// Interval in seconds at which device info is emitted
    #[arg(short, long)]
    announce: Option<u64>,

    /// Collectors to run (case-insensitive); required collectors are always added
    #[arg(short = 's', long = "collector", value_delimiter = ',', default_value = ALL_COLLECTORS)]
    collectors: Vec<String>,

    /// Write records to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Run against the local machine instead of a cluster
    #[arg(long)]
    local: bool,

    /// With --local, run commands inside this podman container
    #[arg(long, requires = "local")]
    local_container: Option<String>,

    /// Start --local-container from this image for the run
    #[arg(long, requires = "local_container")]
    local_image: Option<String>,

    /// Serve /healthz and /metrics on this port
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with(fmt::layer().json())
        .init();

    info!(version = COLLECTOR_VERSION, "Starting sync-collector");

    let mut config = config::CollectorConfig::load(args.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(interface) = &args.interface {
        config.interface = interface.clone();
    }
    if let Some(rate) = args.rate {
        config.poll_interval_secs = rate;
    }
    if let Some(announce) = args.announce {
        config.announce_interval_secs = announce;
    }
    if args.metrics_port.is_some() {
        config.metrics_port = args.metrics_port;
    }
    if args.local_container.is_some() {
        config.local_container = args.local_container.clone();
        config.local_image = args.local_image.clone();
    }
    let duration = match args.duration {
        Some(duration) => duration,
        None => config.run_duration().context("invalid duration in configuration")?,
    };
    info!(interface = %config.interface, duration_secs = duration.as_secs(), "Collector configured");

    let target = if args.local {
        RunTarget::Local
    } else {
        let provider = KubeProvider::connect(args.kubeconfig.as_deref())
            .await
            .context("failed to connect to the cluster")?;
        RunTarget::Cluster(Arc::new(provider))
    };

    let local_container = match (&config.local_container, args.local) {
        (Some(name), true) => Some(
            LocalContainer::new(name, config.local_image.clone().unwrap_or_default()).privileged(),
        ),
        _ => None,
    };
    // Only a container started here is stopped after the run
    let owned_container = match (&local_container, &config.local_image) {
        (Some(container), Some(_)) => {
            container
                .start()
                .await
                .with_context(|| format!("failed to start container {}", container.name))?;
            Some(container.clone())
        }
        _ => None,
    };

    let callback: Arc<dyn Callback> = match &args.output {
        Some(path) => Arc::new(
            FileCallback::create(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?,
        ),
        None => Arc::new(StdoutCallback),
    };

    let mut collector_args = CollectorArgs::new(target, callback, config.interface.clone());
    collector_args.poll_interval = config.poll_interval();
    collector_args.devinfo_announce_interval = config.announce_interval();
    collector_args.gnss_lines = config.gnss_lines;
    collector_args.gnss_timeout_secs = config.gnss_timeout_secs;
    collector_args.contexts = ContextConfig {
        namespace: config.namespace.clone(),
        pod_prefix: config.pod_prefix.clone(),
        daemon_container: config.daemon_container.clone(),
        gpsd_container: config.gpsd_container.clone(),
        local_container,
        ..ContextConfig::default()
    };

    let runner = CollectorRunner::new(
        Registry::with_builtin(),
        RunConfig {
            duration,
            results_capacity: config.results_capacity,
            keys: vec![ALL_KEYS.to_string()],
        },
    );

    let selected = runner
        .registry()
        .select(&args.collectors, collector_args.target.is_local());
    info!(
        collectors = ?selected,
        validations = ?runner.registry().validations_for(&selected),
        "Collectors selected"
    );

    let app_state = Arc::new(api::AppState::new());
    if let Some(port) = config.metrics_port {
        let state = app_state.clone();
        tokio::spawn(async move {
            if let Err(e) = api::serve(port, state).await {
                error!(port, error = %e, "Metrics server failed");
            }
        });
    }

    // Ctrl-C stops the tickers; sessions and the sink are still closed
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping collection run");
            interrupt.cancel();
        }
    });

    app_state.set_collecting(true);
    let summary = runner
        .run_until(collector_args, &args.collectors, cancel)
        .await;
    app_state.set_collecting(false);

    if let Some(container) = owned_container {
        if let Err(e) = container.stop().await {
            warn!(container = %container.name, error = %e, "Failed to stop local container");
        }
    }

    for (name, counts) in &summary.collectors {
        info!(
            collector = %name,
            polls = counts.polls,
            errors = counts.errors,
            "Collector summary"
        );
    }

    if summary.collectors.is_empty() && !summary.skipped.is_empty() {
        bail!("no collector could be started: {}", summary.skipped.join(", "));
    }

    info!("Shutting down");
    Ok(())
}
