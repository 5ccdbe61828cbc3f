//! The download table: one entry per file this peer is currently fetching.
//!
//! Chunks are appended strictly in arrival order and the table refuses
//! anything that is not the next chunk, so an entry never holds more than
//! `total_chunks` chunks and never needs reordering. Entries are removed as
//! soon as verification settles, either way.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use dropline_core::{chunker, progress_percent, FileId, PeerId};

use crate::error::{Result, StoreError};

/// Where a single download stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferState {
    /// Nothing known about this file.
    #[default]
    Idle,
    /// `download-file` sent, no chunk yet.
    Requested,
    /// Chunks arriving.
    Receiving { received: u32, total: u32 },
    /// All chunks in, digest being checked.
    Verifying,
    /// Digest matched.
    Completed,
    /// Digest mismatch, or the download was dropped.
    Failed,
}

impl TransferState {
    /// Whether the download has settled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Failed)
    }
}

/// Metadata carried by the first chunk of a download.
#[derive(Debug, Clone)]
pub struct NewDownload {
    pub file_id: FileId,
    pub owner_id: PeerId,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub total_chunks: u32,
}

/// One in-flight download.
#[derive(Debug, Clone)]
pub struct DownloadEntry {
    pub file_id: FileId,
    pub owner_id: PeerId,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub total_chunks: u32,
    pub received_chunks: Vec<Bytes>,
    /// Set only once verification has succeeded.
    pub completed: bool,
    pub state: TransferState,
    pub last_activity: Instant,
}

impl DownloadEntry {
    fn new(meta: NewDownload, first_chunk: Bytes, now: Instant) -> Self {
        let total = meta.total_chunks;
        Self {
            file_id: meta.file_id,
            owner_id: meta.owner_id,
            file_name: meta.file_name,
            file_size: meta.file_size,
            file_type: meta.file_type,
            total_chunks: total,
            received_chunks: vec![first_chunk],
            completed: false,
            state: TransferState::Receiving { received: 1, total },
            last_activity: now,
        }
    }

    /// Number of chunks received so far.
    pub fn received(&self) -> u32 {
        self.received_chunks.len() as u32
    }

    /// Whether every announced chunk is in.
    pub fn has_all_chunks(&self) -> bool {
        self.received() == self.total_chunks
    }

    /// Progress in percent after the latest chunk.
    pub fn percent(&self) -> u8 {
        progress_percent(self.received(), self.total_chunks)
    }

    /// The reassembled file.
    pub fn assemble(&self) -> Bytes {
        chunker::join(&self.received_chunks)
    }

    fn append(&mut self, owner: &PeerId, index: u32, chunk: Bytes, now: Instant) -> Result<()> {
        if owner != &self.owner_id {
            return Err(StoreError::OwnerMismatch {
                file_id: self.file_id.clone(),
                expected: self.owner_id.clone(),
                got: owner.clone(),
            });
        }
        if self.has_all_chunks() {
            return Err(StoreError::Overflow {
                file_id: self.file_id.clone(),
                total: self.total_chunks,
            });
        }
        let expected = self.received() + 1;
        if index != expected {
            return Err(StoreError::OutOfOrder {
                file_id: self.file_id.clone(),
                expected,
                got: index,
            });
        }

        self.received_chunks.push(chunk);
        self.state = TransferState::Receiving {
            received: self.received(),
            total: self.total_chunks,
        };
        self.last_activity = now;
        Ok(())
    }
}

/// All downloads of this peer, keyed by file id.
#[derive(Debug, Default)]
pub struct DownloadTable {
    entries: HashMap<FileId, DownloadEntry>,
    requested: HashMap<FileId, PeerId>,
    settled: HashMap<FileId, TransferState>,
}

impl DownloadTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, file_id: &FileId) -> Option<&DownloadEntry> {
        self.entries.get(file_id)
    }

    pub fn contains(&self, file_id: &FileId) -> bool {
        self.entries.contains_key(file_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DownloadEntry> {
        self.entries.values()
    }

    /// Current state of the download of `file_id`.
    pub fn state(&self, file_id: &FileId) -> TransferState {
        if let Some(entry) = self.entries.get(file_id) {
            return entry.state;
        }
        if self.requested.contains_key(file_id) {
            return TransferState::Requested;
        }
        self.settled.get(file_id).copied().unwrap_or_default()
    }

    /// Record that a download of `file_id` was requested from `owner`.
    pub fn mark_requested(&mut self, file_id: FileId, owner: PeerId) {
        self.settled.remove(&file_id);
        self.requested.insert(file_id, owner);
    }

    /// The owner a pending request went to.
    pub fn requested_from(&self, file_id: &FileId) -> Option<&PeerId> {
        self.requested.get(file_id)
    }

    /// Start a multi-chunk download with its first chunk.
    ///
    /// An existing entry for the same file is replaced: a fresh first chunk
    /// means the transfer restarted.
    pub fn start(&mut self, meta: NewDownload, first_chunk: Bytes, now: Instant) -> &DownloadEntry {
        let file_id = meta.file_id.clone();
        self.requested.remove(&file_id);
        self.settled.remove(&file_id);
        let entry = DownloadEntry::new(meta, first_chunk, now);
        if self.entries.insert(file_id.clone(), entry).is_some() {
            tracing::debug!("Restarting download of {}", file_id.short());
        }
        &self.entries[&file_id]
    }

    /// Append chunk `index` (1-based) to the download of `file_id`.
    pub fn append(
        &mut self,
        file_id: &FileId,
        owner: &PeerId,
        index: u32,
        chunk: Bytes,
        now: Instant,
    ) -> Result<&DownloadEntry> {
        let entry = self
            .entries
            .get_mut(file_id)
            .ok_or_else(|| StoreError::UnknownDownload(file_id.clone()))?;
        entry.append(owner, index, chunk, now)?;
        Ok(entry)
    }

    /// Move a download into verification.
    pub fn begin_verifying(&mut self, file_id: &FileId) {
        if let Some(entry) = self.entries.get_mut(file_id) {
            entry.state = TransferState::Verifying;
        }
    }

    /// Remove a download after verification, recording its outcome.
    pub fn settle(&mut self, file_id: &FileId, verified: bool) -> Option<DownloadEntry> {
        let state = if verified {
            TransferState::Completed
        } else {
            TransferState::Failed
        };
        self.record_outcome(file_id.clone(), state);
        self.entries.remove(file_id).map(|mut entry| {
            entry.completed = verified;
            entry.state = state;
            entry
        })
    }

    /// Record the outcome of a download that never needed a table entry.
    pub fn record_outcome(&mut self, file_id: FileId, state: TransferState) {
        self.requested.remove(&file_id);
        self.settled.insert(file_id, state);
    }

    /// Drop downloads with no activity for longer than `max_idle`.
    pub fn evict_idle(&mut self, now: Instant, max_idle: Duration) -> Vec<DownloadEntry> {
        let stale: Vec<FileId> = self
            .entries
            .values()
            .filter(|e| now.saturating_duration_since(e.last_activity) > max_idle)
            .map(|e| e.file_id.clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|id| self.settle(&id, false))
            .collect()
    }

    /// Drop everything in flight, as happens when the connection is lost.
    pub fn clear(&mut self) -> Vec<DownloadEntry> {
        let pending: Vec<FileId> = self.requested.keys().cloned().collect();
        for file_id in pending {
            self.record_outcome(file_id, TransferState::Failed);
        }
        let ids: Vec<FileId> = self.entries.keys().cloned().collect();
        ids.into_iter()
            .filter_map(|id| self.settle(&id, false))
            .collect()
    }
}
