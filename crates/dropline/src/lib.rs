//! # Dropline
//!
//! Share files with other peers through a relay, and fetch theirs in
//! verified chunks.
//!
//! ## Overview
//!
//! A [`Peer`] connects to a relay through a [`Channel`](sync::Channel) and
//! keeps a mirror of every file any connected peer advertises. Sharing a file
//! hashes and chunks it locally and lists it; downloading asks the owner for
//! chunk after chunk, reassembles, checks the digest against the file id and
//! hands the bytes to a [`FileSink`].
//!
//! ## Key Concepts
//!
//! - **Catalog**: the per-peer mirror of advertised files, one entry per
//!   `(content id, owner)`.
//! - **Owner**: the peer holding the chunks of a file it shared.
//! - **Relay**: fans catalog events out to everyone and routes transfer
//!   events to their target. Not part of this crate.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dropline::{MemorySink, Peer, PeerConfig};
//! use dropline::core::LocalFile;
//! use dropline::sync::MemoryRelay;
//!
//! async fn example() -> dropline::Result<()> {
//!     let relay = MemoryRelay::new();
//!     let mut peer = Peer::new(relay.create_channel().await, MemorySink::new(), PeerConfig::default());
//!
//!     peer.connect().await?;
//!     peer.share_files(vec![LocalFile::new("notes.txt", "text/plain", &b"hello"[..])]).await?;
//!     peer.pump().await?;
//!
//!     for entry in peer.snapshot() {
//!         println!("{} from {}", entry.file_name, entry.device_name);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `dropline::core` - identities, chunking, catalog entries
//! - `dropline::store` - catalog store and download table
//! - `dropline::sync` - events, channel, engines

pub mod config;
pub mod error;
pub mod peer;
pub mod sink;

// Re-export component crates
pub use dropline_core as core;
pub use dropline_store as store;
pub use dropline_sync as sync;

pub use config::{PeerConfig, ReconnectPolicy, DEFAULT_DEVICE_NAME};
pub use error::{PeerError, Result};
pub use peer::{Peer, PeerNotice};
pub use sink::{FileSink, MemorySink, SinkError};

pub use dropline_core::{CatalogEntry, FileId, LocalFile, PeerId};
pub use dropline_sync::{CompletedDownload, IntegrityFailure};
