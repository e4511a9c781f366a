//! Collection run loop
//!
//! Every selected collector ticks on its own interval until the run's
//! duration elapses. Each tick spawns one poll as a tracked task, and a
//! single aggregation task drains the shared bounded results channel.
//!
//! Shutdown order once the duration elapses or the run is cancelled:
//! 1. stop the tickers
//! 2. wait for in-flight polls
//! 3. close the results channel and collect the summary
//! 4. stop every key, close sessions, clean up the sink

use super::Registry;
use crate::collector::{Collector, CollectorArgs};
use crate::models::PollOutcome;
use crate::observability::{CollectorMetrics, StructuredLogger};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Configuration for one collection run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Total run time (default: 1000 seconds)
    pub duration: Duration,
    /// Capacity of the poll outcome channel
    pub results_capacity: usize,
    /// Keys started on every collector
    pub keys: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(1000),
            results_capacity: 100,
            keys: vec![crate::collector::ALL_KEYS.to_string()],
        }
    }
}

/// Poll and error counts of one collector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectorSummary {
    pub polls: u64,
    pub errors: u64,
}

/// What a run did, per collector
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub collectors: BTreeMap<String, CollectorSummary>,
    /// Selected collectors whose construction failed
    pub skipped: Vec<String>,
}

impl RunSummary {
    fn record(&mut self, outcome: &PollOutcome) {
        let entry = self.collectors.entry(outcome.collector.clone()).or_default();
        entry.polls += 1;
        entry.errors += outcome.errors.len() as u64;
    }

    pub fn total_polls(&self) -> u64 {
        self.collectors.values().map(|c| c.polls).sum()
    }

    pub fn total_errors(&self) -> u64 {
        self.collectors.values().map(|c| c.errors).sum()
    }
}

/// Drives selected collectors for a bounded duration
pub struct CollectorRunner {
    registry: Registry,
    config: RunConfig,
    metrics: CollectorMetrics,
}

impl CollectorRunner {
    pub fn new(registry: Registry, config: RunConfig) -> Self {
        Self {
            registry,
            config,
            metrics: CollectorMetrics::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Select, build and run collectors for the requested names
    pub async fn run(&self, args: CollectorArgs, requested: &[String]) -> RunSummary {
        self.run_until(args, requested, CancellationToken::new()).await
    }

    /// Like [`CollectorRunner::run`], but `cancel` ends the run early
    ///
    /// A cancelled run still waits for in-flight polls, closes sessions
    /// and cleans up the sink.
    pub async fn run_until(
        &self,
        args: CollectorArgs,
        requested: &[String],
        cancel: CancellationToken,
    ) -> RunSummary {
        let logger = StructuredLogger::new(args.target.label());
        let names = self.registry.select(requested, args.target.is_local());
        logger.log_run_started(&names, self.config.duration);

        let mut summary = RunSummary::default();
        let collectors = self.build_collectors(&names, &args, &logger, &mut summary).await;
        self.metrics.set_active_collectors(collectors.len());

        let (results_tx, results_rx) = mpsc::channel(self.config.results_capacity.max(1));
        let aggregator = tokio::spawn(aggregate(results_rx, logger.clone(), self.metrics.clone()));

        let deadline = Instant::now() + self.config.duration;
        let tracker = TaskTracker::new();
        let tickers: Vec<JoinHandle<()>> = collectors
            .iter()
            .map(|collector| {
                tokio::spawn(tick(
                    collector.clone(),
                    results_tx.clone(),
                    tracker.clone(),
                    self.metrics.clone(),
                    deadline,
                    cancel.clone(),
                ))
            })
            .collect();

        for ticker in tickers {
            if let Err(e) = ticker.await {
                error!(error = %e, "Ticker task failed");
            }
        }
        debug!("Tickers stopped, waiting for in-flight polls");

        tracker.close();
        tracker.wait().await;
        drop(results_tx);

        match aggregator.await {
            Ok(aggregated) => summary.collectors = aggregated.collectors,
            Err(e) => error!(error = %e, "Aggregation task failed"),
        }

        for collector in &collectors {
            if let Err(e) = collector.cleanup(crate::collector::ALL_KEYS) {
                warn!(collector = %collector.name(), error = %e, "Cleanup failed");
            }
            collector.close().await;
        }
        self.metrics.set_active_collectors(0);

        if let Err(e) = args.callback.cleanup().await {
            error!(error = %e, "Failed to clean up output sink");
        }

        logger.log_run_finished(summary.total_polls(), summary.total_errors());
        summary
    }

    async fn build_collectors(
        &self,
        names: &[String],
        args: &CollectorArgs,
        logger: &StructuredLogger,
        summary: &mut RunSummary,
    ) -> Vec<Arc<dyn Collector>> {
        let mut collectors = Vec::with_capacity(names.len());

        for name in names {
            let Some(descriptor) = self.registry.get(name) else {
                continue;
            };

            let collector = match (descriptor.constructor)(args.clone()).await {
                Ok(collector) => collector,
                Err(e) => {
                    logger.log_collector_failed(name, &e.to_string());
                    summary.skipped.push(name.clone());
                    continue;
                }
            };

            for key in &self.config.keys {
                if let Err(e) = collector.start(key) {
                    warn!(collector = %name, key = %key, error = %e, "Could not start key");
                }
            }

            logger.log_collector_started(name, collector.poll_interval());
            collectors.push(collector);
        }

        collectors
    }
}

/// Tick one collector until `deadline`, spawning a tracked poll per tick
async fn tick(
    collector: Arc<dyn Collector>,
    results: mpsc::Sender<PollOutcome>,
    tracker: TaskTracker,
    metrics: CollectorMetrics,
    deadline: Instant,
    cancel: CancellationToken,
) {
    let mut ticker = interval(collector.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let stop = sleep_until(deadline);
    tokio::pin!(stop);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let collector = collector.clone();
                let results = results.clone();
                let metrics = metrics.clone();
                tracker.spawn(async move {
                    let started = Instant::now();
                    collector.poll(results).await;
                    metrics.observe_poll_latency(collector.name(), started.elapsed());
                });
            }
        }
    }

    debug!(
        collector = %collector.name(),
        polls = collector.poll_count(),
        "Collector ticker stopped"
    );
}

/// Drain poll outcomes until every sender is gone
async fn aggregate(
    mut results: mpsc::Receiver<PollOutcome>,
    logger: StructuredLogger,
    metrics: CollectorMetrics,
) -> RunSummary {
    let mut summary = RunSummary::default();

    while let Some(outcome) = results.recv().await {
        metrics.record_outcome(&outcome.collector, outcome.errors.len());
        if !outcome.is_ok() {
            let errors: Vec<String> = outcome.errors.iter().map(|e| e.to_string()).collect();
            logger.log_poll_failed(&outcome.collector, &errors);
        }
        summary.record(&outcome);
    }

    info!(polls = summary.total_polls(), "Results channel drained");
    summary
}
