//! Output sinks receiving serialized records
//!
//! Collectors hand every record to a [`Callback`] as
//! `(collector name, data key, JSON payload)`.

use crate::error::CallbackError;
use async_trait::async_trait;
use chrono::Utc;
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Destination for collected records
#[async_trait]
pub trait Callback: Send + Sync {
    /// Persist one record
    async fn call(&self, collector: &str, key: &str, payload: &str) -> Result<(), CallbackError>;

    /// Flush and release the sink
    async fn cleanup(&self) -> Result<(), CallbackError>;
}

fn format_line(collector: &str, key: &str, payload: &str) -> String {
    format!(
        "{}, {}:{}, {}\n",
        Utc::now().to_rfc3339(),
        collector,
        key,
        payload
    )
}

/// Writes records to standard output
#[derive(Debug, Default, Clone)]
pub struct StdoutCallback;

#[async_trait]
impl Callback for StdoutCallback {
    async fn call(&self, collector: &str, key: &str, payload: &str) -> Result<(), CallbackError> {
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(format_line(collector, key, payload).as_bytes())
            .await?;
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), CallbackError> {
        tokio::io::stdout().flush().await?;
        Ok(())
    }
}

/// Appends records to a file
pub struct FileCallback {
    file: Mutex<File>,
}

impl FileCallback {
    pub async fn create(path: impl AsRef<Path>) -> Result<Self, CallbackError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .await?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl Callback for FileCallback {
    async fn call(&self, collector: &str, key: &str, payload: &str) -> Result<(), CallbackError> {
        let line = format_line(collector, key, payload);
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    async fn cleanup(&self) -> Result<(), CallbackError> {
        let mut file = self.file.lock().await;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
}
