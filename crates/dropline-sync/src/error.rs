//! Error types for the sync module.

use std::fmt;

use dropline_core::{FileId, PeerId};
use thiserror::Error;

/// Errors that can occur during catalog sync and transfers.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The channel is not connected to the relay.
    #[error("not connected to relay")]
    NotConnected,

    /// Transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Download table rejected a mutation.
    #[error("store error: {0}")]
    StoreError(#[from] dropline_store::StoreError),

    /// Chunking failed.
    #[error("core error: {0}")]
    CoreError(#[from] dropline_core::CoreError),

    /// Reassembled bytes do not match their content id.
    #[error("{0}")]
    Integrity(IntegrityFailure),

    /// Timeout waiting for the relay.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A background hashing task did not finish.
    #[error("background task failed: {0}")]
    TaskFailed(String),
}

/// A completed download whose digest did not match its file id.
///
/// Names the offending catalog entry so it can be shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityFailure {
    pub file_id: FileId,
    pub owner_id: PeerId,
    pub file_name: String,
    /// Digest of the bytes actually received.
    pub actual: FileId,
}

impl IntegrityFailure {
    /// Text shown to the user.
    pub const MESSAGE: &'static str = "Downloaded file differs from the original file!";
}

impl fmt::Display for IntegrityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} from {}: expected {}, got {})",
            Self::MESSAGE,
            self.file_name,
            self.owner_id,
            self.file_id.short(),
            self.actual.short()
        )
    }
}

impl std::error::Error for IntegrityFailure {}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
