//! Error types for a Dropline peer.

use dropline_core::CoreError;
use dropline_store::StoreError;
use dropline_sync::SyncError;
use thiserror::Error;

use crate::sink::SinkError;

/// Errors that can occur during peer operations.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Relay, codec, or integrity error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Chunking error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// The save collaborator rejected a completed download.
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    /// Configuration could not be read or is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error while reading configuration.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Every connection attempt failed.
    #[error("could not connect after {attempts} attempts: {last}")]
    ConnectFailed { attempts: u32, last: SyncError },
}

/// Result type for peer operations.
pub type Result<T> = std::result::Result<T, PeerError>;
