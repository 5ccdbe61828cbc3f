//! Where verified downloads go.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;

use dropline_sync::CompletedDownload;

/// A save collaborator failed.
#[derive(Debug, Error)]
#[error("could not save {file_name}: {reason}")]
pub struct SinkError {
    pub file_name: String,
    pub reason: String,
}

/// Receives each download once it has been verified.
#[async_trait]
pub trait FileSink: Send + Sync {
    async fn save(&self, download: CompletedDownload) -> Result<(), SinkError>;
}

#[async_trait]
impl<T: FileSink + ?Sized> FileSink for Arc<T> {
    async fn save(&self, download: CompletedDownload) -> Result<(), SinkError> {
        (**self).save(download).await
    }
}

/// Keeps completed downloads in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    saved: Mutex<Vec<CompletedDownload>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything saved so far, oldest first.
    pub fn saved(&self) -> Vec<CompletedDownload> {
        match self.saved.lock() {
            Ok(saved) => saved.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl FileSink for MemorySink {
    async fn save(&self, download: CompletedDownload) -> Result<(), SinkError> {
        let mut saved = self.saved.lock().map_err(|_| SinkError {
            file_name: download.file_name.clone(),
            reason: "sink lock poisoned".into(),
        })?;
        saved.push(download);
        Ok(())
    }
}
