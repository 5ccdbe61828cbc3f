//! # Dropline Sync
//!
//! Catalog synchronization and chunked file transfer over a relay.
//!
//! ## Overview
//!
//! Peers never talk directly. Every event goes through a relay that fans
//! catalog events out to all connected peers and routes transfer events to
//! the peer they are addressed to. Two engines sit on top of a [`Channel`]:
//!
//! - [`CatalogSync`] - mirrors every peer's advertised files
//! - [`TransferEngine`] - serves and fetches files chunk by chunk
//!
//! ## Key Properties
//!
//! - **Single insertion path**: a peer's own listings reach its catalog the
//!   same way everyone else's do, by the relay echoing them back
//! - **Sequential chunks**: chunk `k + 1` is requested only after chunk `k`
//!   is in, so nothing is ever reordered
//! - **Verified completion**: reassembled bytes must hash to their file id
//! - **Malformed events are no-ops**: missing fields default, undecodable
//!   payloads are logged and dropped
//!
//! ## Message Flow
//!
//! ```text
//! Requester                 Relay                  Owner
//!   |-- download-file ------->|--------------------->|
//!   |<------------------------|<-- upload-file-chunk-|  (1 of N)
//!   |-- request-file-chunk -->|--------------------->|
//!   |<------------------------|<-- upload-file-chunk-|  (2 of N)
//!   |          ...            |                      |
//!   |<------------------------|<-- upload-file-chunk-|  (N of N)
//!   |<-- update-total-downloads (to everyone) ------>|
//! ```

pub mod catalog_sync;
pub mod channel;
pub mod error;
pub mod messages;
pub mod transfer;

pub use catalog_sync::{prepare_shared_files, CatalogSync, ShareLimits, DEFAULT_MAX_FILE_SIZE};
pub use channel::{
    memory::{MemoryChannel, MemoryRelay},
    Channel,
};
pub use error::{IntegrityFailure, Result, SyncError};
pub use messages::{
    ChunkEnvelope, ChunkRequest, ClientGone, DeviceRename, DownloadRequest, Event, EventKind,
    FileRef, OwnerRef, PasswordChange, TotalDownloads,
};
pub use transfer::{CompletedDownload, TransferEngine, TransferOutcome};
