use async_trait::async_trait;
use depthsync_core::{SignalBatch, SignalSource};
use std::path::{Path, PathBuf};

use super::{parse_snapshot, SourceError};

/// Reads a JSON snapshot written by an external producer (e.g. a webhook
/// receiver) on every fetch.
#[derive(Debug, Clone)]
pub struct FileSignalSource {
    name: String,
    path: PathBuf,
    enabled: bool,
}

impl FileSignalSource {
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            enabled: true,
        }
    }

    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// # Errors
    /// Returns error if the file cannot be read or parsed.
    pub async fn read(&self) -> Result<SignalBatch, SourceError> {
        let body = tokio::fs::read(&self.path).await?;
        parse_snapshot(&body)
    }
}

#[async_trait]
impl SignalSource for FileSignalSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn fetch_signals(&self) -> anyhow::Result<SignalBatch> {
        let batch = self.read().await?;
        tracing::debug!(
            source = %self.name,
            path = %self.path.display(),
            symbols = batch.len(),
            "Read signal snapshot"
        );
        Ok(batch)
    }
}
