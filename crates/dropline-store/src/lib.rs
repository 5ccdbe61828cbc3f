//! # Dropline Store
//!
//! The two pieces of state a Dropline peer keeps:
//!
//! - [`CatalogStore`] - the local mirror of every file any peer advertises,
//!   plus the per-entry download overlay
//! - [`DownloadTable`] - one [`DownloadEntry`] per file currently being fetched
//!
//! ## Ownership
//!
//! Each structure has exactly one mutator. The catalog sync engine owns the
//! catalog; the transfer engine owns the download table. Everyone else reads
//! through shared references or [`CatalogStore::snapshot`].
//!
//! ## Design Notes
//!
//! - **Unique entries**: the catalog holds at most one entry per `(id, owner)`
//! - **Sequential chunks**: the download table only accepts the next chunk
//! - **No dangling downloads**: entries leave the table when verification
//!   settles, when the connection drops, or when they sit idle too long

pub mod catalog;
pub mod downloads;
pub mod error;

pub use catalog::{CatalogStore, InsertResult};
pub use downloads::{DownloadEntry, DownloadTable, NewDownload, TransferState};
pub use error::{Result, StoreError};
