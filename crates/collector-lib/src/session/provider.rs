//! Cluster capability boundary
//!
//! The session and lifecycle layers only talk to the cluster through
//! [`ClusterProvider`]. The production implementation lives in
//! [`super::KubeProvider`]; tests script their own.

use crate::error::ProviderError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::io::{AsyncRead, AsyncWrite};

/// A one-shot exec request against a container
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub namespace: String,
    pub pod: String,
    pub container: String,
    pub command: Vec<String>,
    /// Bytes piped to the command's stdin; `None` leaves stdin detached
    pub stdin: Option<Vec<u8>>,
}

/// Captured output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}

/// Byte streams of an interactive session
///
/// `stderr` is absent when the remote side multiplexes it into the TTY.
pub struct ShellStreams {
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub stderr: Option<Box<dyn AsyncRead + Send + Unpin>>,
}

/// Pod phase as reported by the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

/// Source backing a pod volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeSource {
    HostPath(String),
    EmptyDir,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadVolume {
    pub name: String,
    pub mount_path: String,
    pub source: VolumeSource,
}

/// Description of an ephemeral single-container pod
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub container: String,
    pub image: String,
    pub command: Vec<String>,
    pub privileged: bool,
    pub host_network: bool,
    pub volumes: Vec<WorkloadVolume>,
}

/// Everything the core needs from a cluster
#[async_trait]
pub trait ClusterProvider: Send + Sync {
    /// Resolve the first pod in `namespace` whose name starts with `prefix`
    async fn find_pod_name(&self, namespace: &str, prefix: &str) -> Result<String, ProviderError>;

    /// Run a command to completion, capturing stdout and stderr
    async fn exec(&self, request: ExecRequest) -> Result<CommandOutput, ProviderError>;

    /// Open a long-lived interactive TTY running `shell`
    async fn open_shell(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        shell: &str,
    ) -> Result<ShellStreams, ProviderError>;

    async fn create_pod(&self, spec: &WorkloadSpec) -> Result<(), ProviderError>;

    /// Phase of the named pod, `None` when it does not exist
    async fn pod_phase(&self, namespace: &str, name: &str) -> Result<Option<PodPhase>, ProviderError>;

    async fn list_pod_names(&self, namespace: &str) -> Result<Vec<String>, ProviderError>;

    /// Delete with foreground cascading propagation
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ProviderError>;
}

/// Pick the first name carrying `prefix`, in listing order
pub fn first_with_prefix<'a, I>(names: I, prefix: &str) -> Option<String>
where
    I: IntoIterator<Item = &'a String>,
{
    names
        .into_iter()
        .find(|name| name.starts_with(prefix))
        .cloned()
}
