//! Collector registry and the run loop driving selected collectors

mod r#loop;
mod registry;


pub use r#loop::{CollectorRunner, CollectorSummary, RunConfig, RunSummary};
pub use registry::{
    Applicability, CollectorDescriptor, Constructor, Registry, RegistryBuilder, Requiredness,
    ALL_COLLECTORS,
};
