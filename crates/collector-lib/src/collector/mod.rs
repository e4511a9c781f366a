//! Collectors for time-sync telemetry
//!
//! A collector binds one telemetry source to a set of collectable keys.
//! Keys are started and stopped independently; every poll fetches each
//! running key, hands the serialized record to the sink callback, and
//! emits exactly one [`PollOutcome`] carrying the per-key errors.
//!
//! Concrete collectors are an [`ExecCollector`] wrapped around a
//! [`DataSource`], which knows how to fetch one key through an exec session.

mod contexts;
mod devinfo;
mod dpll;
mod gnss;

#[cfg(test)]
mod tests;

pub use contexts::{
    open_session, ContextConfig, SessionKind, GPSD_CONTAINER, PTP_CONTAINER, PTP_NAMESPACE,
    PTP_POD_PREFIX,
};
pub use devinfo::{
    descriptor as devinfo_descriptor, DevInfoSource, DEVICE_INFO_KEY, DEV_INFO_COLLECTOR,
};
pub use dpll::{descriptor as dpll_descriptor, DpllSource, DPLL_COLLECTOR, DPLL_INFO_KEY};
pub use gnss::{descriptor as gnss_descriptor, GnssSource, GNSS_COLLECTOR, GNSS_TTY_KEY};

use crate::callbacks::Callback;
use crate::error::CollectorError;
use crate::fetcher::FetcherCache;
use crate::models::PollOutcome;
use crate::session::{ClusterProvider, CommandRunner, ExecSession};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Key that applies a start/cleanup transition to every collectable
pub const ALL_KEYS: &str = "all";

/// Where collectors run their commands
#[derive(Clone)]
pub enum RunTarget {
    Cluster(Arc<dyn ClusterProvider>),
    Local,
}

impl RunTarget {
    pub fn is_local(&self) -> bool {
        matches!(self, RunTarget::Local)
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunTarget::Cluster(_) => "cluster",
            RunTarget::Local => "local",
        }
    }
}

/// Everything a collector constructor needs
#[derive(Clone)]
pub struct CollectorArgs {
    pub target: RunTarget,
    pub callback: Arc<dyn Callback>,
    pub interface: String,
    pub poll_interval: Duration,
    pub devinfo_announce_interval: Duration,
    pub contexts: ContextConfig,
    pub fetchers: Arc<FetcherCache>,
    /// Lines read from the GNSS tty per poll
    pub gnss_lines: usize,
    /// Seconds to wait for those lines
    pub gnss_timeout_secs: u64,
}

impl CollectorArgs {
    pub fn new(target: RunTarget, callback: Arc<dyn Callback>, interface: impl Into<String>) -> Self {
        Self {
            target,
            callback,
            interface: interface.into(),
            poll_interval: Duration::from_secs(1),
            devinfo_announce_interval: Duration::from_secs(60),
            contexts: ContextConfig::default(),
            fetchers: Arc::new(FetcherCache::new()),
            gnss_lines: 1,
            gnss_timeout_secs: 1,
        }
    }
}

/// A telemetry source with independently started keys
#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;

    /// Cadence at which the run loop polls this collector
    fn poll_interval(&self) -> Duration;

    /// Mark `key` (or every key for `"all"`) as running
    fn start(&self, key: &str) -> Result<(), CollectorError>;

    /// Stop `key` (or every key for `"all"`)
    fn cleanup(&self, key: &str) -> Result<(), CollectorError>;

    /// Fetch every running key and send one outcome to `results`
    async fn poll(&self, results: mpsc::Sender<PollOutcome>);

    /// Number of completed polls
    fn poll_count(&self) -> u64;

    /// Release the collector's session
    async fn close(&self);
}

/// Collectable keys and the subset currently running
pub struct KeySet {
    collector: String,
    collectables: Vec<String>,
    running: Mutex<HashSet<String>>,
}

impl KeySet {
    pub fn new(collector: impl Into<String>, collectables: &[&str]) -> Self {
        Self {
            collector: collector.into(),
            collectables: collectables.iter().map(|k| k.to_string()).collect(),
            running: Mutex::new(HashSet::new()),
        }
    }

    fn not_collectable(&self, key: &str) -> CollectorError {
        CollectorError::NotCollectable {
            collector: self.collector.clone(),
            key: key.to_string(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn start(&self, key: &str) -> Result<(), CollectorError> {
        if key == ALL_KEYS {
            self.lock().extend(self.collectables.iter().cloned());
            return Ok(());
        }
        if !self.collectables.iter().any(|k| k == key) {
            return Err(self.not_collectable(key));
        }
        self.lock().insert(key.to_string());
        Ok(())
    }

    pub fn cleanup(&self, key: &str) -> Result<(), CollectorError> {
        if key == ALL_KEYS {
            self.lock().clear();
            return Ok(());
        }
        if !self.collectables.iter().any(|k| k == key) {
            return Err(self.not_collectable(key));
        }
        self.lock().remove(key);
        Ok(())
    }

    /// Running keys in declaration order
    pub fn running(&self) -> Vec<String> {
        let running = self.lock();
        self.collectables
            .iter()
            .filter(|k| running.contains(*k))
            .cloned()
            .collect()
    }

    pub fn collectables(&self) -> &[String] {
        &self.collectables
    }
}

/// Fetches the record behind one collectable key
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Collectable keys in poll order
    fn keys(&self) -> &'static [&'static str];

    /// Fetch `key` through `runner` as a JSON value
    async fn fetch(&self, runner: &dyn CommandRunner, key: &str) -> Result<Value, CollectorError>;
}

/// Collector driving a [`DataSource`] over an exec session
pub struct ExecCollector<S> {
    name: String,
    source: S,
    session: ExecSession,
    callback: Arc<dyn Callback>,
    keys: KeySet,
    poll_interval: Duration,
    polls: AtomicU64,
}

impl<S: DataSource> ExecCollector<S> {
    pub fn new(
        name: impl Into<String>,
        source: S,
        session: ExecSession,
        callback: Arc<dyn Callback>,
        poll_interval: Duration,
    ) -> Self {
        let name = name.into();
        let keys = KeySet::new(name.clone(), source.keys());
        Self {
            name,
            source,
            session,
            callback,
            keys,
            poll_interval,
            polls: AtomicU64::new(0),
        }
    }

    pub fn session(&self) -> &ExecSession {
        &self.session
    }

    pub fn running_keys(&self) -> Vec<String> {
        self.keys.running()
    }

    async fn poll_key(&self, key: &str) -> Result<(), CollectorError> {
        let value = self.source.fetch(&self.session, key).await?;
        let payload = serde_json::to_string(&value).map_err(|source| CollectorError::Serialize {
            key: key.to_string(),
            source,
        })?;
        self.callback
            .call(&self.name, key, &payload)
            .await
            .map_err(|e| CollectorError::Callback {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl<S: DataSource> Collector for ExecCollector<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn start(&self, key: &str) -> Result<(), CollectorError> {
        self.keys.start(key)?;
        debug!(collector = %self.name, key = %key, "Started collecting");
        Ok(())
    }

    fn cleanup(&self, key: &str) -> Result<(), CollectorError> {
        self.keys.cleanup(key)?;
        debug!(collector = %self.name, key = %key, "Stopped collecting");
        Ok(())
    }

    async fn poll(&self, results: mpsc::Sender<PollOutcome>) {
        let mut errors = Vec::new();
        for key in self.keys.running() {
            if let Err(e) = self.poll_key(&key).await {
                debug!(collector = %self.name, key = %key, error = %e, "Key failed this cycle");
                errors.push(e);
            }
        }

        self.polls.fetch_add(1, Ordering::SeqCst);
        if results
            .send(PollOutcome::new(self.name.clone(), errors))
            .await
            .is_err()
        {
            warn!(collector = %self.name, "Results channel closed, dropping poll outcome");
        }
    }

    fn poll_count(&self) -> u64 {
        self.polls.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.session.close().await;
    }
}
