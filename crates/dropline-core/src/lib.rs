//! # Dropline Core
//!
//! Pure primitives for Dropline: content identity, chunking, and catalog
//! entries.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over file bytes and their advertisements.
//!
//! ## Key Types
//!
//! - [`FileId`] - Content-addressed identifier (Blake3 hex digest)
//! - [`PeerId`] - Relay connection identifier of a peer
//! - [`CatalogEntry`] - One file advertised by one peer
//! - [`LocalFile`] - A file picked locally for sharing
//!
//! ## Chunking
//!
//! Files move in fixed-size chunks. See [`chunker`]; `join(split(x)) == x`
//! for every input and every positive chunk size.

pub mod catalog;
pub mod chunker;
pub mod error;
pub mod identity;
pub mod types;

pub use catalog::{format_file_size, progress_percent, CatalogEntry, DownloadOverlay, LocalFile};
pub use chunker::{chunk_count, join, split, DEFAULT_CHUNK_SIZE};
pub use error::{CoreError, Result};
pub use identity::{compute_identity, ContentDigest};
pub use types::{FileId, PeerId};
