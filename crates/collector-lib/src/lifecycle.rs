//! Ephemeral pod lifecycle
//!
//! Creates a pod from a [`WorkloadSpec`], waits until it runs, and tears it
//! down again on request. Pods are never reclaimed automatically: a pod
//! whose start wait timed out is left in place for the caller to delete.
//!
//! Both waits share [`poll_until`].

use crate::error::{LifecycleError, ProviderError};
use crate::session::{ClusterProvider, ContainerSession, PodPhase, WorkloadSpec};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

/// Re-check `predicate` every `interval` until it holds or `timeout` elapses
///
/// Returns `Ok(true)` once the predicate holds and `Ok(false)` on timeout.
/// The predicate is always evaluated at least once; its errors end the wait.
pub async fn poll_until<F, Fut, E>(
    interval: Duration,
    timeout: Duration,
    mut predicate: F,
) -> Result<bool, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if predicate().await? {
            return Ok(true);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        sleep(interval.min(deadline - now)).await;
    }
}

/// Bounds for the lifecycle waits
#[derive(Debug, Clone)]
pub struct LifecycleTimeouts {
    pub poll_interval: Duration,
    pub start_timeout: Duration,
    pub delete_timeout: Duration,
}

impl Default for LifecycleTimeouts {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            start_timeout: Duration::from_secs(120),
            delete_timeout: Duration::from_secs(600),
        }
    }
}

/// Owner of one ephemeral pod
pub struct PodLifecycle {
    provider: Arc<dyn ClusterProvider>,
    spec: WorkloadSpec,
    timeouts: LifecycleTimeouts,
    /// Set once this manager has submitted the pod
    submitted: Mutex<bool>,
}

impl PodLifecycle {
    pub fn new(provider: Arc<dyn ClusterProvider>, spec: WorkloadSpec) -> Self {
        Self {
            provider,
            spec,
            timeouts: LifecycleTimeouts::default(),
            submitted: Mutex::new(false),
        }
    }

    pub fn with_timeouts(mut self, timeouts: LifecycleTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn spec(&self) -> &WorkloadSpec {
        &self.spec
    }

    /// Submit the pod unless it is already held, then wait until it runs
    pub async fn create_and_wait(&self) -> Result<(), LifecycleError> {
        let mut submitted = self.submitted.lock().await;

        let exists = if *submitted {
            self.provider
                .pod_phase(&self.spec.namespace, &self.spec.name)
                .await?
                .is_some()
        } else {
            false
        };

        if exists {
            debug!(pod = %self.spec.name, "Pod already submitted, skipping create");
        } else {
            self.provider.create_pod(&self.spec).await?;
            *submitted = true;
            info!(
                namespace = %self.spec.namespace,
                pod = %self.spec.name,
                image = %self.spec.image,
                "Created pod"
            );
        }

        self.wait_for_running().await
    }

    async fn wait_for_running(&self) -> Result<(), LifecycleError> {
        let provider = &self.provider;
        let spec = &self.spec;
        let running = poll_until(
            self.timeouts.poll_interval,
            self.timeouts.start_timeout,
            || async move {
                let phase = provider.pod_phase(&spec.namespace, &spec.name).await?;
                Ok::<_, ProviderError>(phase == Some(PodPhase::Running))
            },
        )
        .await?;

        if running {
            debug!(pod = %self.spec.name, "Pod is running");
            Ok(())
        } else {
            Err(LifecycleError::TimedOut {
                what: format!("pod {} to start", self.spec.name),
                timeout: self.timeouts.start_timeout,
            })
        }
    }

    /// Delete the pod with foreground propagation and wait until it is gone
    ///
    /// A pod that is already absent counts as deleted.
    pub async fn delete_and_wait(&self) -> Result<(), LifecycleError> {
        let mut submitted = self.submitted.lock().await;

        match self
            .provider
            .delete_pod(&self.spec.namespace, &self.spec.name)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(pod = %self.spec.name, "Pod already absent");
            }
            Err(e) => return Err(e.into()),
        }

        let provider = &self.provider;
        let spec = &self.spec;
        let gone = poll_until(
            self.timeouts.poll_interval,
            self.timeouts.delete_timeout,
            || async move {
                let names = provider.list_pod_names(&spec.namespace).await?;
                Ok::<_, ProviderError>(!names.iter().any(|name| name == &spec.name))
            },
        )
        .await?;

        if !gone {
            return Err(LifecycleError::TimedOut {
                what: format!("pod {} to terminate", self.spec.name),
                timeout: self.timeouts.delete_timeout,
            });
        }

        *submitted = false;
        info!(namespace = %self.spec.namespace, pod = %self.spec.name, "Deleted pod");
        Ok(())
    }

    /// Per-call exec session bound to the created pod
    pub fn session(&self) -> ContainerSession {
        ContainerSession::for_pod(
            self.provider.clone(),
            self.spec.namespace.clone(),
            self.spec.name.clone(),
            self.spec.container.clone(),
        )
    }
}
