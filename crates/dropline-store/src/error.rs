//! Error types for the store module.

use dropline_core::{FileId, PeerId};
use thiserror::Error;

/// Errors that can occur when mutating the download table.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No in-flight download for this file.
    #[error("no download in progress for {0}")]
    UnknownDownload(FileId),

    /// Chunk came from a different owner than the one being fetched from.
    #[error("download {file_id} is from {expected}, chunk came from {got}")]
    OwnerMismatch {
        file_id: FileId,
        expected: PeerId,
        got: PeerId,
    },

    /// Chunk is not the next one in sequence.
    #[error("download {file_id} expected chunk {expected}, got {got}")]
    OutOfOrder {
        file_id: FileId,
        expected: u32,
        got: u32,
    },

    /// More chunks than announced.
    #[error("download {file_id} already holds all {total} chunks")]
    Overflow { file_id: FileId, total: u32 },
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
