//! Exec sessions for the PTP daemon pod's containers

use super::RunTarget;
use crate::error::SessionError;
use crate::session::{
    ContainerSession, ExecSession, LocalContainer, LocalSession, PersistentSession,
    PersistentSessionConfig, SessionTarget,
};

pub const PTP_NAMESPACE: &str = "openshift-ptp";
pub const PTP_POD_PREFIX: &str = "linuxptp-daemon-";
pub const PTP_CONTAINER: &str = "linuxptp-daemon-container";
pub const GPSD_CONTAINER: &str = "gpsd";

/// Which exec session variant a collector wants on a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    PerCall,
    Persistent,
}

/// Location of the PTP daemon pod and its containers
#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub namespace: String,
    pub pod_prefix: String,
    pub daemon_container: String,
    pub gpsd_container: String,
    pub persistent: PersistentSessionConfig,
    /// Local runs exec into this podman container instead of the host
    pub local_container: Option<LocalContainer>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            namespace: PTP_NAMESPACE.to_string(),
            pod_prefix: PTP_POD_PREFIX.to_string(),
            daemon_container: PTP_CONTAINER.to_string(),
            gpsd_container: GPSD_CONTAINER.to_string(),
            persistent: PersistentSessionConfig::default(),
            local_container: None,
        }
    }
}

impl ContextConfig {
    pub fn daemon_target(&self) -> SessionTarget {
        SessionTarget::new(&self.namespace, &self.pod_prefix, &self.daemon_container)
    }

    pub fn gpsd_target(&self) -> SessionTarget {
        SessionTarget::new(&self.namespace, &self.pod_prefix, &self.gpsd_container)
    }
}

/// Open a session on `target`, or a local one when running locally
pub async fn open_session(
    run_target: &RunTarget,
    target: SessionTarget,
    kind: SessionKind,
    config: &ContextConfig,
) -> Result<ExecSession, SessionError> {
    let provider = match run_target {
        RunTarget::Local => {
            let session = match &config.local_container {
                Some(container) => LocalSession::in_container(container.clone()),
                None => LocalSession::new(),
            };
            return Ok(ExecSession::Local(session));
        }
        RunTarget::Cluster(provider) => provider.clone(),
    };

    match kind {
        SessionKind::PerCall => Ok(ExecSession::Container(
            ContainerSession::connect(provider, target).await?,
        )),
        SessionKind::Persistent => Ok(ExecSession::Persistent(
            PersistentSession::open(provider, target, config.persistent.clone()).await?,
        )),
    }
}
