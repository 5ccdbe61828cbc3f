//! Catalog sync engine.
//!
//! Keeps the local [`CatalogStore`] in step with what every peer advertises.
//! Local actions never touch the store directly: they emit an event and the
//! store changes when the relay echoes it back, so every insertion and
//! removal goes through the inbound handlers below.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::de::DeserializeOwned;

use dropline_core::{
    chunker, compute_identity, format_file_size, CatalogEntry, CoreError, DownloadOverlay, FileId,
    LocalFile, PeerId, DEFAULT_CHUNK_SIZE,
};
use dropline_store::CatalogStore;

use crate::channel::Channel;
use crate::error::{Result, SyncError};
use crate::messages::{
    ClientGone, DeviceRename, Event, EventKind, FileRef, OwnerRef, PasswordChange, TotalDownloads,
};

/// Default cap on shared file size (256 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 256 * 1024 * 1024;

/// Size limits applied when sharing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareLimits {
    /// Bytes per chunk.
    pub chunk_size: usize,
    /// Files of this size or larger are not shared.
    pub max_file_size: u64,
}

impl Default for ShareLimits {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// Chunks of a file this peer shared, waiting to be attached to its entry.
#[derive(Debug, Default)]
struct OwnedPayload {
    chunks: Vec<Bytes>,
    /// `(file_name, file_size)` pairs listed under this content id.
    listings: HashSet<(String, u64)>,
}

impl OwnedPayload {
    fn is_listed(&self, file_name: &str, file_size: u64) -> bool {
        self.listings.contains(&(file_name.to_string(), file_size))
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Build catalog entries for the files a user picked.
///
/// Oversize files are dropped before any hashing. Every remaining file is
/// hashed and chunked on the blocking pool; all of them are joined before any
/// entry is built. Files already present in `existing` (same id, name and
/// size), or repeated within `files`, are skipped.
pub async fn prepare_shared_files(
    files: Vec<LocalFile>,
    existing: &CatalogStore,
    device_name: &str,
    owner_id: &PeerId,
    limits: ShareLimits,
) -> Result<Vec<CatalogEntry>> {
    let handles: Vec<_> = files
        .into_iter()
        .filter(|file| {
            let keep = file.size() < limits.max_file_size;
            if !keep {
                tracing::debug!(
                    "Skipping {}: {} is over the share limit",
                    file.name,
                    format_file_size(file.size())
                );
            }
            keep
        })
        .map(|file| {
            let chunk_size = limits.chunk_size;
            tokio::task::spawn_blocking(move || {
                let id = compute_identity(&file.bytes);
                let chunks = chunker::split(&file.bytes, chunk_size)?;
                Ok::<_, CoreError>((file, id, chunks))
            })
        })
        .collect();

    let mut prepared = Vec::with_capacity(handles.len());
    for handle in handles {
        prepared.push(
            handle
                .await
                .map_err(|e| SyncError::TaskFailed(e.to_string()))??,
        );
    }

    let created_at = now_millis();
    let mut entries: Vec<CatalogEntry> = Vec::new();
    for (file, id, chunks) in prepared {
        let size = file.size();
        if existing.contains_file(&id, &file.name, size)
            || entries.iter().any(|e| e.is_same_file(&id, &file.name, size))
        {
            tracing::debug!("{} is already listed", file.name);
            continue;
        }

        entries.push(CatalogEntry {
            id,
            owner_id: owner_id.clone(),
            device_name: device_name.to_string(),
            file_name: file.name,
            file_size: size,
            file_type: file.file_type,
            file_last_modified: file.last_modified,
            created_at,
            with_password: false,
            total_downloads: 0,
            is_owner: true,
            chunks,
            overlay: DownloadOverlay::default(),
        });
    }
    Ok(entries)
}

/// The catalog sync engine: sole mutator of the catalog store.
pub struct CatalogSync<C: Channel> {
    channel: Arc<C>,
    local_id: PeerId,
    device_name: String,
    limits: ShareLimits,
    store: CatalogStore,
    owned: HashMap<FileId, OwnedPayload>,
}

impl<C: Channel> CatalogSync<C> {
    /// Create an engine with an empty catalog.
    pub fn new(channel: Arc<C>, device_name: impl Into<String>, limits: ShareLimits) -> Self {
        let local_id = channel.local_peer_id();
        Self {
            channel,
            local_id,
            device_name: device_name.into(),
            limits,
            store: CatalogStore::new(),
            owned: HashMap::new(),
        }
    }

    /// Read-only view of the catalog.
    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    /// The label attached to files this peer shares.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Whether this peer holds the payload for `file_id`.
    pub fn owns(&self, file_id: &FileId) -> bool {
        self.owned.contains_key(file_id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local actions
    // ─────────────────────────────────────────────────────────────────────────

    /// Share local files.
    ///
    /// Emits one `list-file` per new entry and returns those entries. The
    /// catalog itself only changes when the listings come back.
    pub async fn share_files(&mut self, files: Vec<LocalFile>) -> Result<Vec<CatalogEntry>> {
        let entries = prepare_shared_files(
            files,
            &self.store,
            &self.device_name,
            &self.local_id,
            self.limits,
        )
        .await?;

        let mut listed = Vec::with_capacity(entries.len());
        for entry in entries {
            let staged = self.owned.entry(entry.id.clone()).or_default();
            if staged.is_listed(&entry.file_name, entry.file_size) {
                continue;
            }
            staged.chunks = entry.chunks.clone();
            staged
                .listings
                .insert((entry.file_name.clone(), entry.file_size));

            self.channel
                .emit(Event::encode(EventKind::ListFile, &entry)?)
                .await?;
            tracing::info!(
                "Sharing {} ({}, {} chunks)",
                entry.file_name,
                format_file_size(entry.file_size),
                entry.total_chunks()
            );
            listed.push(entry);
        }
        Ok(listed)
    }

    /// Withdraw one of this peer's files. Returns false if it is not ours.
    pub async fn delete_file(&mut self, file_id: &FileId) -> Result<bool> {
        if !self.owns(file_id) {
            return Ok(false);
        }
        let event = Event::encode(
            EventKind::DeleteFile,
            &FileRef {
                file_id: file_id.clone(),
            },
        )?;
        self.channel.emit(event).await?;
        Ok(true)
    }

    /// Withdraw every file this peer shares.
    pub async fn delete_all_files(&mut self) -> Result<()> {
        let event = Event::encode(
            EventKind::DeleteAllFiles,
            &OwnerRef {
                owner_id: self.local_id.clone(),
            },
        )?;
        self.channel.emit(event).await
    }

    /// Toggle password protection on one of this peer's files.
    pub async fn set_password(&mut self, file_id: &FileId, with_password: bool) -> Result<bool> {
        if !self.owns(file_id) {
            return Ok(false);
        }
        let kind = if with_password {
            EventKind::ChangePassword
        } else {
            EventKind::RemovePassword
        };
        let event = Event::encode(
            kind,
            &PasswordChange {
                file_id: file_id.clone(),
                owner_id: self.local_id.clone(),
            },
        )?;
        self.channel.emit(event).await?;
        Ok(true)
    }

    /// Rename this device, for files already shared and future shares.
    pub async fn rename_device(&mut self, new_name: impl Into<String>) -> Result<()> {
        self.device_name = new_name.into();
        let event = Event::encode(
            EventKind::UpdateDeviceName,
            &DeviceRename {
                new_device_name: self.device_name.clone(),
                owner_id: self.local_id.clone(),
            },
        )?;
        self.channel.emit(event).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound events
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply a catalog event. Returns whether the catalog changed.
    ///
    /// Undecodable events are logged and dropped.
    pub fn handle_event(&mut self, event: &Event) -> bool {
        match event.kind {
            EventKind::ListFile => decoded(event).map_or(false, |e: CatalogEntry| self.on_file_listed(e)),
            EventKind::RequestListedFiles => {
                decoded(event).map_or(false, |entries: Vec<CatalogEntry>| self.on_bulk_listed(entries))
            }
            EventKind::DeleteFile => {
                decoded(event).map_or(false, |FileRef { file_id }| self.on_file_deleted(&file_id))
            }
            EventKind::DeleteAllFiles => decoded(event)
                .map_or(false, |OwnerRef { owner_id }| self.on_owner_deleted_all(&owner_id)),
            EventKind::ClientDisconnect => decoded(event)
                .map_or(false, |ClientGone { id }| self.on_owner_disconnected(&id)),
            EventKind::ChangePassword | EventKind::RemovePassword => {
                let with_password = event.kind == EventKind::ChangePassword;
                decoded(event).map_or(false, |PasswordChange { file_id, owner_id }| {
                    self.on_password_changed(&file_id, &owner_id, with_password)
                })
            }
            EventKind::UpdateDeviceName => decoded(event).map_or(
                false,
                |DeviceRename {
                     new_device_name,
                     owner_id,
                 }| self.on_device_renamed(&owner_id, &new_device_name),
            ),
            EventKind::UpdateTotalDownloads => decoded(event).map_or(
                false,
                |TotalDownloads {
                     file_id,
                     total_downloads,
                 }| self.on_download_count_updated(&file_id, total_downloads),
            ),
            kind => {
                tracing::debug!("Catalog sync ignoring {}", kind);
                false
            }
        }
    }

    /// A peer listed a file.
    ///
    /// The transmitted `isOwner` is never trusted: an entry is ours only if
    /// it carries our id and we staged its payload.
    pub fn on_file_listed(&mut self, mut entry: CatalogEntry) -> bool {
        if entry.id.is_empty() || entry.owner_id.is_empty() {
            tracing::warn!("Dropping listing without id or owner");
            return false;
        }

        entry.overlay = DownloadOverlay::default();
        match self.owned.get(&entry.id) {
            Some(payload) if entry.owner_id == self.local_id => {
                entry.is_owner = true;
                entry.chunks = payload.chunks.clone();
            }
            _ => {
                entry.is_owner = false;
                entry.chunks.clear();
            }
        }

        tracing::debug!("Listed {} from {}", entry.file_name, entry.owner_id);
        self.store.insert(entry);
        true
    }

    /// Initial snapshot on (re)connect.
    pub fn on_bulk_listed(&mut self, entries: Vec<CatalogEntry>) -> bool {
        let mut changed = false;
        for entry in entries {
            changed |= self.on_file_listed(entry);
        }
        changed
    }

    /// A file was withdrawn; drop it under every owner.
    pub fn on_file_deleted(&mut self, file_id: &FileId) -> bool {
        self.owned.remove(file_id);
        !self.store.remove_by_id(file_id).is_empty()
    }

    /// An owner withdrew everything.
    pub fn on_owner_deleted_all(&mut self, owner_id: &PeerId) -> bool {
        if owner_id == &self.local_id {
            self.owned.clear();
        }
        !self.store.remove_by_owner(owner_id).is_empty()
    }

    /// An owner left the relay. Same effect as a delete-all.
    pub fn on_owner_disconnected(&mut self, owner_id: &PeerId) -> bool {
        tracing::debug!("{} disconnected", owner_id);
        self.on_owner_deleted_all(owner_id)
    }

    pub fn on_password_changed(
        &mut self,
        file_id: &FileId,
        owner_id: &PeerId,
        with_password: bool,
    ) -> bool {
        self.store.set_password(file_id, owner_id, with_password) > 0
    }

    pub fn on_device_renamed(&mut self, owner_id: &PeerId, new_name: &str) -> bool {
        self.store.rename_device(owner_id, new_name) > 0
    }

    /// The relay's tally for a content id; applies across owners.
    pub fn on_download_count_updated(&mut self, file_id: &FileId, total_downloads: u64) -> bool {
        self.store.set_total_downloads(file_id, total_downloads) > 0
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Download overlay
    // ─────────────────────────────────────────────────────────────────────────

    pub fn set_overlay(&mut self, file_id: &FileId, owner_id: &PeerId, overlay: DownloadOverlay) -> bool {
        self.store.set_overlay(file_id, owner_id, overlay) > 0
    }

    /// Put every in-progress entry back to not-downloading.
    pub fn reset_downloads(&mut self) -> usize {
        self.store.reset_in_progress()
    }

    /// Forget the mirror. Staged payloads survive so our own entries are
    /// recognised when the snapshot comes back.
    pub fn clear(&mut self) {
        self.store.clear();
    }
}

/// Decode a payload, logging and discarding anything malformed.
fn decoded<T: DeserializeOwned>(event: &Event) -> Option<T> {
    match event.decode() {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::warn!("Dropping malformed {}: {}", event.kind, e);
            None
        }
    }
}
