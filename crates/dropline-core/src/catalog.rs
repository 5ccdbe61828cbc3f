//! Catalog entries and local share candidates.
//!
//! A [`CatalogEntry`] is one file advertised by one peer. Entries are unique
//! per `(id, owner_id)`: the same bytes shared by two peers are two entries.
//!
//! Only the advertised metadata goes over the wire. The chunk payload lives
//! on the owner alone, and the download overlay is local UI state, so both are
//! skipped by serde.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::{FileId, PeerId};

/// One advertised file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CatalogEntry {
    /// Content identity (hex digest of the whole file).
    pub id: FileId,
    /// Connection id of the advertising peer.
    pub owner_id: PeerId,
    /// Human label of the owner; changes on rename.
    pub device_name: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    /// Last modification time of the source file (Unix ms).
    pub file_last_modified: i64,
    /// When the file was shared (Unix ms).
    pub created_at: i64,
    pub with_password: bool,
    /// Global download tally for this content id, pushed by the relay.
    pub total_downloads: u64,
    /// True only on the peer that shared the file.
    pub is_owner: bool,
    /// Chunked payload, populated only on the owner.
    #[serde(skip)]
    pub chunks: Vec<Bytes>,
    #[serde(skip)]
    pub overlay: DownloadOverlay,
}

impl CatalogEntry {
    /// Whether this entry advertises the given file.
    ///
    /// Used to keep an owner from listing the same file twice.
    pub fn is_same_file(&self, id: &FileId, file_name: &str, file_size: u64) -> bool {
        &self.id == id && self.file_name == file_name && self.file_size == file_size
    }

    /// Number of chunks held locally.
    pub fn total_chunks(&self) -> u32 {
        self.chunks.len() as u32
    }

    /// The chunk at 1-based position `index`.
    pub fn chunk(&self, index: u32) -> Option<&Bytes> {
        let position = index.checked_sub(1)?;
        self.chunks.get(position as usize)
    }
}

/// Per-entry download state shown to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadOverlay {
    /// 0..=100.
    pub percent: u8,
    pub is_downloading: bool,
    pub completed: bool,
}

impl DownloadOverlay {
    /// In progress at `percent`.
    pub fn downloading(percent: u8) -> Self {
        Self {
            percent,
            is_downloading: true,
            completed: false,
        }
    }

    /// Verified and handed to the sink.
    pub fn completed() -> Self {
        Self {
            percent: 100,
            is_downloading: false,
            completed: true,
        }
    }
}

/// A file picked locally for sharing.
#[derive(Debug, Clone, Default)]
pub struct LocalFile {
    pub name: String,
    pub file_type: String,
    /// Unix ms.
    pub last_modified: i64,
    pub bytes: Bytes,
}

impl LocalFile {
    pub fn new(name: impl Into<String>, file_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            file_type: file_type.into(),
            last_modified: 0,
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Download progress after receiving chunk `current` of `total`.
///
/// `round(current / (total / 100))` in floating point. This is only exactly
/// 100 when `current == total`.
pub fn progress_percent(current: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = (f64::from(current) / (f64::from(total) / 100.0)).round();
    percent.clamp(0.0, 100.0) as u8
}

/// Human-readable size: B below 1 KiB, then KB, MB, GB with two decimals.
pub fn format_file_size(size: u64) -> String {
    const KIB: f64 = 1024.0;
    if size < 1024 {
        return format!("{} B", size);
    }
    let size = size as f64;
    if size < KIB * KIB {
        return format!("{:.2} KB", size / KIB);
    }
    let megabytes = size / KIB / KIB;
    if megabytes > 1024.0 {
        return format!("{:.2} GB", megabytes / KIB);
    }
    format!("{:.2} MB", megabytes)
}
