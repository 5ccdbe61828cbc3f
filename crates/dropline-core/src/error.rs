//! Error types for Dropline core.

use thiserror::Error;

/// Core errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("chunk size must be positive")]
    InvalidChunkSize,
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
