//! Command fetcher
//!
//! A [`Fetcher`] holds an ordered set of labelled shell commands. Each
//! fetch runs them through a [`CommandRunner`], cleans their output, lets
//! an optional post-processor derive extra values from the raw map, and
//! then fills a destination [`Record`] through its binding table.
//!
//! - Commands flagged as cached run at most once per fetcher; later
//!   fetches reuse the stored output
//! - A label with no value leaves its field untouched (zero value)
//! - The first failing command or post-processor aborts the fetch
//!
//! Fetchers are built once per logical target and shared through a
//! [`FetcherCache`].

use crate::error::FetchError;
use crate::session::{CommandRunner, SHELL_COMMAND};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// Output-cleanup function applied to a command's stdout
pub type CleanupFn = fn(&str) -> String;

/// Hook deriving structured values from the raw label→output map
pub type PostProcessor = Box<
    dyn Fn(&HashMap<String, String>) -> Result<HashMap<String, Value>, FetchError> + Send + Sync,
>;

/// Default cleanup: strip surrounding whitespace
pub fn trim_output(output: &str) -> String {
    output.trim().to_string()
}

/// One labelled shell command
#[derive(Clone)]
pub struct Command {
    pub label: String,
    pub command_line: String,
    pub cleanup: CleanupFn,
    pub cached: bool,
}

impl Command {
    pub fn new(label: impl Into<String>, command_line: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            command_line: command_line.into(),
            cleanup: trim_output,
            cached: false,
        }
    }

    pub fn with_cleanup(mut self, cleanup: CleanupFn) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// Run only once; for values fixed over the target's lifetime
    pub fn cached(mut self) -> Self {
        self.cached = true;
        self
    }
}

/// Setter writing one label's value into a record field
pub type Setter<R> = fn(&mut R, &Value) -> Result<(), FetchError>;

/// One entry of a record's binding table
pub struct Binding<R> {
    pub label: &'static str,
    pub set: Setter<R>,
}

impl<R> Binding<R> {
    pub const fn new(label: &'static str, set: Setter<R>) -> Self {
        Self { label, set }
    }
}

/// A destination populated by [`Fetcher::fetch`]
pub trait Record: Sized + 'static {
    /// Ordered label → setter pairs
    fn bindings() -> &'static [Binding<Self>];
}

/// Deserialize `value` into `slot`, reporting the label on mismatch
pub fn assign<T: DeserializeOwned>(
    slot: &mut T,
    label: &str,
    value: &Value,
) -> Result<(), FetchError> {
    *slot = serde_json::from_value(value.clone()).map_err(|e| FetchError::Binding {
        label: label.to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}

/// Runs a declared command set and binds the results into records
#[derive(Default)]
pub struct Fetcher {
    commands: Vec<Command>,
    post_processor: Option<PostProcessor>,
    /// One cell per cached label; a failed run leaves it empty
    cache: HashMap<String, OnceCell<String>>,
}

impl Fetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_command(&mut self, command: Command) -> &mut Self {
        if command.cached {
            self.cache.entry(command.label.clone()).or_default();
        }
        self.commands.push(command);
        self
    }

    pub fn set_post_processor<F>(&mut self, post_processor: F) -> &mut Self
    where
        F: Fn(&HashMap<String, String>) -> Result<HashMap<String, Value>, FetchError>
            + Send
            + Sync
            + 'static,
    {
        self.post_processor = Some(Box::new(post_processor));
        self
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Run the command set and populate `destination`
    pub async fn fetch<R: Record>(
        &self,
        runner: &dyn CommandRunner,
        destination: &mut R,
    ) -> Result<(), FetchError> {
        let raw = self.run_commands(runner).await?;

        let mut values: HashMap<String, Value> = raw
            .iter()
            .map(|(label, output)| (label.clone(), Value::String(output.clone())))
            .collect();

        if let Some(post_processor) = &self.post_processor {
            values.extend(post_processor(&raw)?);
        }

        for binding in R::bindings() {
            if let Some(value) = values.get(binding.label) {
                (binding.set)(destination, value)?;
            }
        }
        Ok(())
    }

    async fn run_commands(
        &self,
        runner: &dyn CommandRunner,
    ) -> Result<HashMap<String, String>, FetchError> {
        let mut raw = HashMap::with_capacity(self.commands.len());

        for command in &self.commands {
            // Overlapping fetches wait on the cell instead of running the command again
            let output = match self.cache.get(&command.label) {
                Some(cell) => cell
                    .get_or_try_init(|| run_command(runner, command))
                    .await?
                    .clone(),
                None => run_command(runner, command).await?,
            };
            raw.insert(command.label.clone(), output);
        }

        Ok(raw)
    }
}

async fn run_command(runner: &dyn CommandRunner, command: &Command) -> Result<String, FetchError> {
    let shell = [SHELL_COMMAND.to_string()];
    let output = runner
        .run_with_input(&shell, &command.command_line)
        .await
        .map_err(|source| FetchError::Command {
            label: command.label.clone(),
            source,
        })?;

    let cleaned = (command.cleanup)(&output.stdout);
    debug!(label = %command.label, value = %cleaned, "Fetched command output");
    Ok(cleaned)
}

/// Fetchers memoized per logical key (e.g. per interface)
#[derive(Default)]
pub struct FetcherCache {
    fetchers: DashMap<String, Arc<Fetcher>>,
}

impl FetcherCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetcher for `key`, building it on first use
    ///
    /// Concurrent first callers for one key get the same instance and
    /// `build` runs once.
    pub fn get_or_build<F>(&self, key: &str, build: F) -> Arc<Fetcher>
    where
        F: FnOnce() -> Fetcher,
    {
        self.fetchers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(build()))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.fetchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }
}
