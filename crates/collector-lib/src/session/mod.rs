//! Exec sessions for running diagnostic commands in containers
//!
//! A session is a [`SessionTarget`] identity plus one transport variant:
//! - [`ContainerSession`]: one remote exec call per command
//! - [`PersistentSession`]: one long-lived shell, commands serialized through a queue
//! - [`LocalSession`]: commands run on this machine
//!
//! Collectors and fetchers only see the [`CommandRunner`] capability.

mod container;
mod kube_provider;
mod local;
mod persistent;
mod provider;

pub use container::ContainerSession;
pub use kube_provider::KubeProvider;
pub use local::{LocalContainer, LocalSession};
pub use persistent::{PersistentSession, PersistentSessionConfig, DEFAULT_PROMPT_PATTERN};
pub use provider::{
    first_with_prefix, ClusterProvider, CommandOutput, ExecRequest, PodPhase, ShellStreams,
    VolumeSource, WorkloadSpec, WorkloadVolume,
};

use crate::error::SessionError;
use async_trait::async_trait;

/// Shell used for stdin-fed commands and persistent sessions
pub const SHELL_COMMAND: &str = "/usr/bin/sh";

/// Where commands run: namespace, pod name prefix and container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub namespace: String,
    pub pod_prefix: String,
    pub container: String,
}

impl SessionTarget {
    pub fn new(
        namespace: impl Into<String>,
        pod_prefix: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            pod_prefix: pod_prefix.into(),
            container: container.into(),
        }
    }
}

/// Capability to run commands and capture their output
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` with no stdin
    async fn run(&self, command: &[String]) -> Result<CommandOutput, SessionError>;

    /// Run `command` feeding `input` to its stdin
    async fn run_with_input(
        &self,
        command: &[String],
        input: &str,
    ) -> Result<CommandOutput, SessionError>;
}

/// An exec session of any variant
pub enum ExecSession {
    Container(ContainerSession),
    Persistent(PersistentSession),
    Local(LocalSession),
}

impl ExecSession {
    /// Identity of the remote target, `None` for local sessions
    pub fn target(&self) -> Option<&SessionTarget> {
        match self {
            ExecSession::Container(session) => Some(session.target()),
            ExecSession::Persistent(session) => Some(session.target()),
            ExecSession::Local(_) => None,
        }
    }

    /// Release the session's transport
    ///
    /// Only persistent sessions hold anything; closing them waits for the
    /// shell's output to drain.
    pub async fn close(&self) {
        if let ExecSession::Persistent(session) = self {
            if let Err(e) = session.close().await {
                tracing::debug!(error = %e, "Persistent session already closed");
            }
        }
    }
}

#[async_trait]
impl CommandRunner for ExecSession {
    async fn run(&self, command: &[String]) -> Result<CommandOutput, SessionError> {
        match self {
            ExecSession::Container(session) => session.run(command).await,
            ExecSession::Persistent(session) => session.run(command).await,
            ExecSession::Local(session) => session.run(command).await,
        }
    }

    async fn run_with_input(
        &self,
        command: &[String],
        input: &str,
    ) -> Result<CommandOutput, SessionError> {
        match self {
            ExecSession::Container(session) => session.run_with_input(command, input).await,
            ExecSession::Persistent(session) => session.run_with_input(command, input).await,
            ExecSession::Local(session) => session.run_with_input(command, input).await,
        }
    }
}

/// Build an owned argv from string slices
pub fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}
