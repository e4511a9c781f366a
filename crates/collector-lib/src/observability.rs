//! Observability infrastructure for the collector
//!
//! Provides:
//! - Prometheus metrics (poll counts, poll errors, poll latency, active collectors)
//! - Structured JSON event logging with tracing

use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, HistogramVec,
    IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Histogram buckets for poll latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<CollectorMetricsInner> = OnceLock::new();

struct CollectorMetricsInner {
    polls_total: IntCounterVec,
    poll_errors_total: IntCounterVec,
    poll_latency_seconds: HistogramVec,
    active_collectors: IntGauge,
}

impl CollectorMetricsInner {
    fn new() -> Self {
        Self {
            polls_total: register_int_counter_vec!(
                "sync_collector_polls_total",
                "Total number of completed poll cycles",
                &["collector"]
            )
            .expect("Failed to register polls_total"),

            poll_errors_total: register_int_counter_vec!(
                "sync_collector_poll_errors_total",
                "Total number of per-key errors reported by poll cycles",
                &["collector"]
            )
            .expect("Failed to register poll_errors_total"),

            poll_latency_seconds: register_histogram_vec!(
                "sync_collector_poll_latency_seconds",
                "Time spent in one poll cycle",
                &["collector"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register poll_latency_seconds"),

            active_collectors: register_int_gauge!(
                "sync_collector_active_collectors",
                "Number of collectors currently running"
            )
            .expect("Failed to register active_collectors"),
        }
    }
}

/// Handle to the process-wide collector metrics
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct CollectorMetrics {
    _private: (),
}

impl Default for CollectorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(CollectorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &CollectorMetricsInner {
        GLOBAL_METRICS.get_or_init(CollectorMetricsInner::new)
    }

    /// Count one poll outcome and its per-key errors
    pub fn record_outcome(&self, collector: &str, errors: usize) {
        let inner = self.inner();
        inner.polls_total.with_label_values(&[collector]).inc();
        inner
            .poll_errors_total
            .with_label_values(&[collector])
            .inc_by(errors as u64);
    }

    pub fn observe_poll_latency(&self, collector: &str, elapsed: Duration) {
        self.inner()
            .poll_latency_seconds
            .with_label_values(&[collector])
            .observe(elapsed.as_secs_f64());
    }

    pub fn set_active_collectors(&self, count: usize) {
        self.inner().active_collectors.set(count as i64);
    }

    pub fn polls(&self, collector: &str) -> u64 {
        self.inner()
            .polls_total
            .with_label_values(&[collector])
            .get()
    }

    pub fn poll_errors(&self, collector: &str) -> u64 {
        self.inner()
            .poll_errors_total
            .with_label_values(&[collector])
            .get()
    }
}

/// Structured logger for collection run events
#[derive(Clone)]
pub struct StructuredLogger {
    target: String,
}

impl StructuredLogger {
    /// `target` names where commands run: a cluster context or `local`
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    pub fn log_run_started(&self, collectors: &[String], duration: Duration) {
        info!(
            event = "run_started",
            run_target = %self.target,
            collectors = ?collectors,
            duration_secs = duration.as_secs(),
            "Collection run started"
        );
    }

    pub fn log_collector_started(&self, collector: &str, poll_interval: Duration) {
        info!(
            event = "collector_started",
            run_target = %self.target,
            collector = %collector,
            poll_interval_ms = poll_interval.as_millis() as u64,
            "Collector started"
        );
    }

    pub fn log_collector_failed(&self, collector: &str, reason: &str) {
        warn!(
            event = "collector_failed",
            run_target = %self.target,
            collector = %collector,
            reason = %reason,
            "Collector could not be started, skipping"
        );
    }

    pub fn log_poll_failed(&self, collector: &str, errors: &[String]) {
        warn!(
            event = "poll_failed",
            run_target = %self.target,
            collector = %collector,
            error_count = errors.len(),
            errors = ?errors,
            "Poll cycle reported errors"
        );
    }

    pub fn log_run_finished(&self, polls: u64, errors: u64) {
        info!(
            event = "run_finished",
            run_target = %self.target,
            polls = polls,
            errors = errors,
            "Collection run finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_metrics_record_poll() {
        let metrics = CollectorMetrics::new();
        let before_polls = metrics.polls("metrics-test");
        let before_errors = metrics.poll_errors("metrics-test");

        metrics.record_outcome("metrics-test", 2);
        metrics.record_outcome("metrics-test", 0);
        metrics.observe_poll_latency("metrics-test", Duration::from_millis(30));
        metrics.set_active_collectors(3);

        assert_eq!(metrics.polls("metrics-test"), before_polls + 2);
        assert_eq!(metrics.poll_errors("metrics-test"), before_errors + 2);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("local");
        assert_eq!(logger.target, "local");
    }
}
