//! Transfer engine: chunk-by-chunk downloads through the relay.
//!
//! The owner side is stateless. It answers `download-file` with chunk 1 and
//! each `request-file-chunk` with the chunk asked for. The requester side
//! owns the [`DownloadTable`] and asks for chunk `k + 1` only after chunk `k`
//! has been appended, so chunks always arrive in order.
//!
//! Every completed download is verified against its content id before the
//! bytes are released, whether it came in one chunk or many.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use dropline_core::{chunker, CatalogEntry, ContentDigest, FileId, PeerId};
use dropline_store::{CatalogStore, DownloadEntry, DownloadTable, NewDownload, TransferState};

use crate::channel::Channel;
use crate::error::{IntegrityFailure, Result, SyncError};
use crate::messages::{ChunkEnvelope, ChunkRequest, DownloadRequest, Event, EventKind};

/// A verified download, ready to be saved.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedDownload {
    pub file_id: FileId,
    pub owner_id: PeerId,
    pub file_name: String,
    pub file_type: String,
    pub bytes: Bytes,
}

/// What handling one transfer event amounted to.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    /// Nothing to do: unknown, malformed, or out-of-sequence.
    Ignored,
    /// We served a chunk as owner.
    Served,
    /// A chunk was appended and the next one requested.
    Progress {
        file_id: FileId,
        owner_id: PeerId,
        percent: u8,
    },
    /// All chunks in and the digest matched.
    Completed(CompletedDownload),
    /// All chunks in and the digest did not match.
    Failed(IntegrityFailure),
}

/// Drives both halves of the transfer protocol for one peer.
pub struct TransferEngine<C: Channel> {
    channel: Arc<C>,
    local_id: PeerId,
    downloads: DownloadTable,
}

impl<C: Channel> TransferEngine<C> {
    pub fn new(channel: Arc<C>) -> Self {
        let local_id = channel.local_peer_id();
        Self {
            channel,
            local_id,
            downloads: DownloadTable::new(),
        }
    }

    /// Downloads in flight.
    pub fn downloads(&self) -> &DownloadTable {
        &self.downloads
    }

    /// Where the download of `file_id` stands.
    pub fn state(&self, file_id: &FileId) -> TransferState {
        self.downloads.state(file_id)
    }

    /// Ask `owner_id` for `file_id`.
    ///
    /// Returns false without emitting anything if the catalog has no such
    /// entry, or if the entry is our own.
    pub async fn initiate(
        &mut self,
        file_id: &FileId,
        owner_id: &PeerId,
        catalog: &CatalogStore,
    ) -> Result<bool> {
        if owner_id == &self.local_id || catalog.get(file_id, owner_id).is_none() {
            tracing::debug!("No remote entry {} from {}", file_id.short(), owner_id);
            return Ok(false);
        }

        let request = DownloadRequest {
            file_id: file_id.clone(),
            owner_id: owner_id.clone(),
            target_id: self.local_id.clone(),
        };
        self.channel
            .emit_to(owner_id, Event::encode(EventKind::DownloadFile, &request)?)
            .await?;
        self.downloads.mark_requested(file_id.clone(), owner_id.clone());
        Ok(true)
    }

    /// Dispatch a transfer event.
    ///
    /// Malformed payloads are logged and ignored; only transport failures
    /// come back as errors.
    pub async fn handle_event(
        &mut self,
        event: &Event,
        catalog: &CatalogStore,
    ) -> Result<TransferOutcome> {
        match event.kind {
            EventKind::DownloadFile => match event.decode::<DownloadRequest>() {
                Ok(request) => self.on_download_requested(request, catalog).await,
                Err(e) => Ok(malformed(event, e)),
            },
            EventKind::RequestFileChunk => match event.decode::<ChunkRequest>() {
                Ok(request) => self.on_chunk_requested(request, catalog).await,
                Err(e) => Ok(malformed(event, e)),
            },
            EventKind::UploadFileChunk => match event.decode::<ChunkEnvelope>() {
                Ok(envelope) => self.on_chunk_received(envelope).await,
                Err(e) => Ok(malformed(event, e)),
            },
            kind => {
                tracing::debug!("Transfer engine ignoring {}", kind);
                Ok(TransferOutcome::Ignored)
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Owner side
    // ─────────────────────────────────────────────────────────────────────────

    /// Start serving a file we own.
    pub async fn on_download_requested(
        &self,
        request: DownloadRequest,
        catalog: &CatalogStore,
    ) -> Result<TransferOutcome> {
        let entry = match catalog.find_owned(&request.file_id) {
            Some(entry) if !request.target_id.is_empty() => entry,
            _ => return Ok(TransferOutcome::Ignored),
        };
        tracing::info!("Serving {} to {}", entry.file_name, request.target_id);
        self.send_chunk(entry, 1, &request.target_id).await
    }

    /// Serve one chunk. Looks the file up by id under any owner.
    pub async fn on_chunk_requested(
        &self,
        request: ChunkRequest,
        catalog: &CatalogStore,
    ) -> Result<TransferOutcome> {
        match catalog.find_by_id(&request.file_id) {
            Some(entry) if !request.target_id.is_empty() => {
                self.send_chunk(entry, request.chunk_index, &request.target_id)
                    .await
            }
            _ => Ok(TransferOutcome::Ignored),
        }
    }

    async fn send_chunk(
        &self,
        entry: &CatalogEntry,
        index: u32,
        target: &PeerId,
    ) -> Result<TransferOutcome> {
        let chunk = match entry.chunk(index) {
            Some(chunk) => chunk.clone(),
            None => return Ok(TransferOutcome::Ignored),
        };
        let envelope = ChunkEnvelope {
            chunk,
            current_chunk: index,
            total_chunks: entry.total_chunks(),
            file_id: entry.id.clone(),
            file_name: entry.file_name.clone(),
            file_size: entry.file_size,
            owner_id: entry.owner_id.clone(),
            target_id: target.clone(),
            file_type: entry.file_type.clone(),
        };
        self.channel
            .emit_to(target, Event::encode(EventKind::UploadFileChunk, &envelope)?)
            .await?;
        Ok(TransferOutcome::Served)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Requester side
    // ─────────────────────────────────────────────────────────────────────────

    /// Take in one chunk.
    pub async fn on_chunk_received(&mut self, envelope: ChunkEnvelope) -> Result<TransferOutcome> {
        let ChunkEnvelope {
            chunk,
            current_chunk,
            total_chunks,
            file_id,
            file_name,
            file_size,
            owner_id,
            target_id,
            file_type,
        } = envelope;

        if file_id.is_empty()
            || total_chunks == 0
            || current_chunk == 0
            || current_chunk > total_chunks
        {
            tracing::warn!(
                "Ignoring chunk {}/{} for {:?}",
                current_chunk,
                total_chunks,
                file_id
            );
            return Ok(TransferOutcome::Ignored);
        }
        if !target_id.is_empty() && target_id != self.local_id {
            tracing::warn!("Ignoring chunk addressed to {}", target_id);
            return Ok(TransferOutcome::Ignored);
        }

        let meta = NewDownload {
            file_id,
            owner_id,
            file_name,
            file_size,
            file_type,
            total_chunks,
        };
        let now = Instant::now();

        match (current_chunk, total_chunks) {
            (1, 1) => {
                let (digest, bytes) = tokio::task::spawn_blocking(move || {
                    (ContentDigest::hash(&chunk), chunk)
                })
                .await
                .map_err(|e| SyncError::TaskFailed(e.to_string()))?;

                let state = if digest.matches(&meta.file_id) {
                    TransferState::Completed
                } else {
                    TransferState::Failed
                };
                self.downloads.record_outcome(meta.file_id.clone(), state);
                Ok(conclude(meta, digest, bytes))
            }
            (1, _) => {
                let percent = self.downloads.start(meta.clone(), chunk, now).percent();
                self.request_chunk(&meta.file_id, &meta.owner_id, 2).await?;
                Ok(TransferOutcome::Progress {
                    file_id: meta.file_id,
                    owner_id: meta.owner_id,
                    percent,
                })
            }
            (index, total) => {
                let percent = match self
                    .downloads
                    .append(&meta.file_id, &meta.owner_id, index, chunk, now)
                {
                    Ok(entry) => entry.percent(),
                    Err(e) => {
                        tracing::warn!("Ignoring chunk: {}", e);
                        return Ok(TransferOutcome::Ignored);
                    }
                };

                if index < total {
                    self.request_chunk(&meta.file_id, &meta.owner_id, index + 1)
                        .await?;
                    Ok(TransferOutcome::Progress {
                        file_id: meta.file_id,
                        owner_id: meta.owner_id,
                        percent,
                    })
                } else {
                    self.finish(&meta.file_id).await
                }
            }
        }
    }

    /// Verify and settle a download whose last chunk is in.
    async fn finish(&mut self, file_id: &FileId) -> Result<TransferOutcome> {
        let parts = match self.downloads.get(file_id) {
            Some(entry) => entry.received_chunks.clone(),
            None => return Ok(TransferOutcome::Ignored),
        };
        self.downloads.begin_verifying(file_id);

        let (digest, bytes) = tokio::task::spawn_blocking(move || {
            let digest = ContentDigest::hash_parts(parts.iter().map(|c| &c[..]));
            (digest, chunker::join(&parts))
        })
        .await
        .map_err(|e| SyncError::TaskFailed(e.to_string()))?;

        match self.downloads.settle(file_id, digest.matches(file_id)) {
            Some(entry) => Ok(conclude(meta_of(entry), digest, bytes)),
            None => Ok(TransferOutcome::Ignored),
        }
    }

    async fn request_chunk(&self, file_id: &FileId, owner_id: &PeerId, index: u32) -> Result<()> {
        let request = ChunkRequest {
            file_id: file_id.clone(),
            owner_id: owner_id.clone(),
            target_id: self.local_id.clone(),
            chunk_index: index,
        };
        self.channel
            .emit_to(owner_id, Event::encode(EventKind::RequestFileChunk, &request)?)
            .await
    }

    /// Drop downloads idle for longer than `max_idle`.
    pub fn evict_idle(&mut self, max_idle: Duration) -> Vec<DownloadEntry> {
        let evicted = self.downloads.evict_idle(Instant::now(), max_idle);
        for entry in &evicted {
            tracing::warn!(
                "Abandoning {} after {} of {} chunks",
                entry.file_name,
                entry.received(),
                entry.total_chunks
            );
        }
        evicted
    }

    /// Drop every download; transfers do not survive a lost connection.
    pub fn drop_all(&mut self) -> Vec<DownloadEntry> {
        self.downloads.clear()
    }
}

fn meta_of(entry: DownloadEntry) -> NewDownload {
    NewDownload {
        file_id: entry.file_id,
        owner_id: entry.owner_id,
        file_name: entry.file_name,
        file_size: entry.file_size,
        file_type: entry.file_type,
        total_chunks: entry.total_chunks,
    }
}

fn conclude(meta: NewDownload, digest: ContentDigest, bytes: Bytes) -> TransferOutcome {
    if digest.matches(&meta.file_id) {
        tracing::info!("Downloaded {} from {}", meta.file_name, meta.owner_id);
        TransferOutcome::Completed(CompletedDownload {
            file_id: meta.file_id,
            owner_id: meta.owner_id,
            file_name: meta.file_name,
            file_type: meta.file_type,
            bytes,
        })
    } else {
        let failure = IntegrityFailure {
            file_id: meta.file_id,
            owner_id: meta.owner_id,
            file_name: meta.file_name,
            actual: digest.file_id(),
        };
        tracing::warn!("{}", failure);
        TransferOutcome::Failed(failure)
    }
}

fn malformed(event: &Event, e: SyncError) -> TransferOutcome {
    tracing::warn!("Dropping malformed {}: {}", event.kind, e);
    TransferOutcome::Ignored
}
