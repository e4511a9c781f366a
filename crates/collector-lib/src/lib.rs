//! Collection core for time-sync telemetry
//!
//! This crate provides the core functionality for:
//! - Exec sessions into cluster containers (per-call, persistent, local)
//! - Ephemeral pod lifecycle management
//! - Command fetching with cached outputs and field bindings
//! - Collectors with independently started keys
//! - Collector registry, selection and the timed run loop
//! - Output sinks, metrics and structured logging

pub mod callbacks;
pub mod collector;
pub mod error;
pub mod fetcher;
pub mod lifecycle;
pub mod models;
pub mod observability;
pub mod runner;
pub mod session;

#[cfg(test)]
mod testutils;

pub use callbacks::{Callback, FileCallback, StdoutCallback};
pub use collector::{Collector, CollectorArgs, RunTarget};
pub use error::{
    CallbackError, CollectorError, FetchError, LifecycleError, ProviderError, SessionError,
};
pub use models::*;
pub use observability::{CollectorMetrics, StructuredLogger};
pub use runner::{CollectorRunner, Registry, RunConfig, RunSummary};
