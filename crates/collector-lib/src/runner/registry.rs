//! Collector registry and selection
//!
//! The registry is built once at startup from collector descriptors and
//! is read-only afterwards. Selection resolves a user request into the
//! ordered list of collectors to run.

use crate::collector::{Collector, CollectorArgs};
use crate::error::CollectorError;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{error, warn};

/// Selection keyword expanding to every optional collector
pub const ALL_COLLECTORS: &str = "all";

/// Builds a collector from the shared construction arguments
pub type Constructor =
    fn(CollectorArgs) -> BoxFuture<'static, Result<Arc<dyn Collector>, CollectorError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requiredness {
    /// Always selected
    Required,
    /// Selected by name or by `"all"`
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applicability {
    /// Needs a cluster; dropped when running locally
    RunOnCluster,
    RunAnywhere,
}

/// Registration entry for one collector
#[derive(Clone)]
pub struct CollectorDescriptor {
    pub name: &'static str,
    pub constructor: Constructor,
    pub requiredness: Requiredness,
    pub applicability: Applicability,
    /// Identifiers of the validations that consume this collector's data
    pub validations: &'static [&'static str],
}

impl std::fmt::Debug for CollectorDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorDescriptor")
            .field("name", &self.name)
            .field("requiredness", &self.requiredness)
            .field("applicability", &self.applicability)
            .field("validations", &self.validations)
            .finish()
    }
}

/// Builder for a [`Registry`]
#[derive(Default)]
pub struct RegistryBuilder {
    descriptors: Vec<CollectorDescriptor>,
}

impl RegistryBuilder {
    /// Add a descriptor; a second descriptor with the same name is ignored
    pub fn register(mut self, descriptor: CollectorDescriptor) -> Self {
        if self
            .descriptors
            .iter()
            .any(|d| d.name.eq_ignore_ascii_case(descriptor.name))
        {
            warn!(collector = %descriptor.name, "Collector registered twice, keeping the first");
            return self;
        }
        self.descriptors.push(descriptor);
        self
    }

    pub fn build(self) -> Registry {
        Registry {
            descriptors: self.descriptors,
        }
    }
}

/// Immutable set of known collectors, in registration order
#[derive(Debug, Clone)]
pub struct Registry {
    descriptors: Vec<CollectorDescriptor>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Registry with every collector shipped in this crate
    pub fn with_builtin() -> Self {
        Self::builder()
            .register(crate::collector::devinfo_descriptor())
            .register(crate::collector::dpll_descriptor())
            .register(crate::collector::gnss_descriptor())
            .build()
    }

    pub fn get(&self, name: &str) -> Option<&CollectorDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    pub fn descriptors(&self) -> &[CollectorDescriptor] {
        &self.descriptors
    }

    fn names_with(&self, requiredness: Requiredness) -> impl Iterator<Item = &'static str> + '_ {
        self.descriptors
            .iter()
            .filter(move |d| d.requiredness == requiredness)
            .map(|d| d.name)
    }

    pub fn required_names(&self) -> Vec<&'static str> {
        self.names_with(Requiredness::Required).collect()
    }

    pub fn optional_names(&self) -> Vec<&'static str> {
        self.names_with(Requiredness::Optional).collect()
    }

    /// Resolve a request into collector names
    ///
    /// Required collectors come first. `"all"` adds every optional
    /// collector; other names match case-insensitively. Unknown names are
    /// logged and dropped. When `local` is set, collectors that need a
    /// cluster are dropped too.
    pub fn select(&self, requested: &[String], local: bool) -> Vec<String> {
        let mut names: Vec<&'static str> = self.required_names();

        for name in requested {
            if name.eq_ignore_ascii_case(ALL_COLLECTORS) {
                names.extend(self.names_with(Requiredness::Optional));
                continue;
            }
            match self.get(name) {
                Some(descriptor) => names.push(descriptor.name),
                None => error!(collector = %name, "Unknown collector {}. Ignored", name),
            }
        }

        let mut selected: Vec<String> = Vec::with_capacity(names.len());
        for name in names {
            if selected.iter().any(|s| s == name) {
                continue;
            }
            if local
                && self.get(name).map(|d| d.applicability) == Some(Applicability::RunOnCluster)
            {
                warn!(collector = %name, "Collector needs a cluster, skipping for local run");
                continue;
            }
            selected.push(name.to_string());
        }
        selected
    }

    /// Validation identifiers covered by `names`
    pub fn validations_for(&self, names: &[String]) -> Vec<&'static str> {
        let mut ids: Vec<&'static str> = Vec::new();
        for name in names {
            if let Some(descriptor) = self.get(name) {
                for &id in descriptor.validations {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
            }
        }
        ids
    }
}
