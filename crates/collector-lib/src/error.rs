//! Error types for the collection core
//!
//! Each layer has its own enum so callers can tell a recoverable
//! condition (a restarted pod) from a configuration mistake or a
//! parse failure without string matching.

use kube::client::UpgradeConnectionError;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a [`ClusterProvider`](crate::session::ClusterProvider)
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The named object does not exist (usually a restarted pod)
    #[error("not found: {0}")]
    NotFound(String),

    #[error("cluster API error: {0}")]
    Api(String),

    /// The exec channel could not be established
    #[error("failed to connect: {0}")]
    Connect(String),

    /// The exec channel broke or the command reported failure
    #[error("stream failed: {0}")]
    Stream(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }
}

impl From<ProviderError> for SessionError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(name) => SessionError::TargetNotFound(name),
            ProviderError::Api(msg) | ProviderError::Connect(msg) => {
                SessionError::SessionSetupFailed(msg)
            }
            ProviderError::Stream(msg) => SessionError::StreamFailed(msg),
            ProviderError::Io(err) => SessionError::StreamFailed(err.to_string()),
        }
    }
}

impl From<kube::Error> for ProviderError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) if response.code == 404 => {
                ProviderError::NotFound(response.message)
            }
            // Exec against a missing pod fails the websocket upgrade instead
            kube::Error::UpgradeConnection(UpgradeConnectionError::ProtocolSwitch(status))
                if status.as_u16() == 404 =>
            {
                ProviderError::NotFound(format!("exec upgrade rejected: {}", status))
            }
            other => ProviderError::Api(other.to_string()),
        }
    }
}

/// Errors from running a command through an exec session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("error setting up remote command: {0}")]
    SessionSetupFailed(String),

    #[error("error running remote command: {0}")]
    StreamFailed(String),

    /// The target pod vanished; the session name has been refreshed for the next call
    #[error("target {0} not found, session refreshed for the next call")]
    TargetNotFound(String),

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("session is closed")]
    Closed,
}

/// Errors from creating or deleting an ephemeral pod
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("timed out after {timeout:?} waiting for {what}")]
    TimedOut { what: String, timeout: Duration },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Errors from a [`Fetcher`](crate::fetcher::Fetcher) run
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("command {label} failed: {source}")]
    Command {
        label: String,
        #[source]
        source: SessionError,
    },

    #[error("failed to parse output: {0}")]
    Parse(String),

    #[error("failed to bind {label}: {reason}")]
    Binding { label: String, reason: String },
}

/// Errors reported by collectors, either synchronously or inside a poll outcome
#[derive(Error, Debug)]
pub enum CollectorError {
    /// The key is not one of the collector's collectables
    #[error("key {key} is not a collectable of {collector}")]
    NotCollectable { collector: String, key: String },

    #[error("failed to fetch {key}: {source}")]
    Fetch {
        key: String,
        #[source]
        source: FetchError,
    },

    #[error("failed to marshal {key}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("callback failed for {key}: {reason}")]
    Callback { key: String, reason: String },

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("failed to set up collector: {0}")]
    Setup(String),
}

/// Errors from an output sink
#[derive(Error, Debug)]
pub enum CallbackError {
    #[error("failed to write to sink: {0}")]
    Write(#[from] std::io::Error),
}
