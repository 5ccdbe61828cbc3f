//! The Peer: one participant in a Dropline relay.
//!
//! A peer owns its connection to the relay, both engines, and the save
//! collaborator. All state changes happen inside `&mut self` methods, one
//! event at a time, so the engines never need locks.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::time::Instant;

use dropline_core::{CatalogEntry, DownloadOverlay, FileId, LocalFile, PeerId};
use dropline_store::{CatalogStore, DownloadTable, TransferState};
use dropline_sync::{
    CatalogSync, Channel, Event, EventKind, IntegrityFailure, TransferEngine, TransferOutcome,
};

use crate::config::PeerConfig;
use crate::error::{PeerError, Result};
use crate::sink::FileSink;

/// Capacity of the notice channel; slow subscribers miss the oldest notices.
const NOTICE_CAPACITY: usize = 256;

/// Things a UI wants to hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerNotice {
    Connected,
    Disconnected,
    /// The catalog mirror changed; re-read [`Peer::snapshot`].
    CatalogChanged,
    DownloadProgress {
        file_id: FileId,
        owner_id: PeerId,
        percent: u8,
    },
    DownloadCompleted {
        file_id: FileId,
        owner_id: PeerId,
        file_name: String,
    },
    /// The downloaded bytes did not match the file id.
    DownloadFailed {
        failure: IntegrityFailure,
        entry: Option<CatalogEntry>,
    },
    /// A download was dropped: connection lost, or idle too long.
    DownloadAbandoned { file_id: FileId, owner_id: PeerId },
}

/// A Dropline peer.
pub struct Peer<C: Channel, S: FileSink> {
    config: PeerConfig,
    channel: Arc<C>,
    catalog: CatalogSync<C>,
    transfers: TransferEngine<C>,
    sink: S,
    notices: broadcast::Sender<PeerNotice>,
    connected: bool,
}

impl<C: Channel, S: FileSink> Peer<C, S> {
    /// Create a disconnected peer.
    pub fn new(channel: C, sink: S, config: PeerConfig) -> Self {
        let channel = Arc::new(channel);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            catalog: CatalogSync::new(
                Arc::clone(&channel),
                config.device_name.clone(),
                config.share_limits(),
            ),
            transfers: TransferEngine::new(Arc::clone(&channel)),
            channel,
            config,
            sink,
            notices,
            connected: false,
        }
    }

    /// This peer's id on the relay.
    pub fn id(&self) -> PeerId {
        self.channel.local_peer_id()
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The catalog mirror.
    pub fn catalog(&self) -> &CatalogStore {
        self.catalog.store()
    }

    /// Owned copy of the catalog mirror.
    pub fn snapshot(&self) -> Vec<CatalogEntry> {
        self.catalog.store().snapshot()
    }

    pub fn downloads(&self) -> &DownloadTable {
        self.transfers.downloads()
    }

    pub fn transfer_state(&self, file_id: &FileId) -> TransferState {
        self.transfers.state(file_id)
    }

    /// Listen for notices.
    pub fn subscribe_notices(&self) -> broadcast::Receiver<PeerNotice> {
        self.notices.subscribe()
    }

    fn notify(&self, notice: PeerNotice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Connection lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Connect to the relay, retrying with back-off.
    ///
    /// On success every handler is subscribed, the local mirror is cleared,
    /// and the current listing is requested from the relay.
    pub async fn connect(&mut self) -> Result<()> {
        let policy = self.config.reconnect;
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.channel.connect().await {
                Ok(()) => break,
                Err(e) if attempts >= policy.max_attempts => {
                    return Err(PeerError::ConnectFailed { attempts, last: e });
                }
                Err(e) => {
                    let delay = policy.delay_for(attempts - 1);
                    tracing::warn!(
                        "Connect attempt {} failed: {}; retrying in {:?}",
                        attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        for kind in EventKind::HANDLED {
            self.channel.subscribe(kind).await?;
        }
        self.catalog.clear();
        self.channel
            .emit(Event::empty(EventKind::RequestListedFiles))
            .await?;
        self.connected = true;

        tracing::info!("Connected to relay as {}", self.id());
        self.notify(PeerNotice::Connected);
        self.notify(PeerNotice::CatalogChanged);
        Ok(())
    }

    /// Leave the relay. Does nothing if not connected.
    pub async fn close(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }

        self.channel.emit(Event::empty(EventKind::Close)).await?;
        for kind in EventKind::HANDLED {
            self.channel.unsubscribe(kind).await?;
        }
        self.connection_lost();
        self.channel.disconnect().await?;
        tracing::info!("Closed connection to relay");
        Ok(())
    }

    fn connection_lost(&mut self) {
        self.connected = false;
        for entry in self.transfers.drop_all() {
            self.notify(PeerNotice::DownloadAbandoned {
                file_id: entry.file_id,
                owner_id: entry.owner_id,
            });
        }
        if self.catalog.reset_downloads() > 0 {
            self.notify(PeerNotice::CatalogChanged);
        }
        self.notify(PeerNotice::Disconnected);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local actions
    // ─────────────────────────────────────────────────────────────────────────

    /// Share files. Returns the entries actually listed.
    pub async fn share_files(&mut self, files: Vec<LocalFile>) -> Result<Vec<CatalogEntry>> {
        Ok(self.catalog.share_files(files).await?)
    }

    pub async fn delete_file(&mut self, file_id: &FileId) -> Result<bool> {
        Ok(self.catalog.delete_file(file_id).await?)
    }

    pub async fn delete_all_files(&mut self) -> Result<()> {
        Ok(self.catalog.delete_all_files().await?)
    }

    pub async fn set_password(&mut self, file_id: &FileId, with_password: bool) -> Result<bool> {
        Ok(self.catalog.set_password(file_id, with_password).await?)
    }

    /// Rename this device for existing and future shares.
    pub async fn rename_device(&mut self, new_name: impl Into<String>) -> Result<()> {
        let new_name = new_name.into();
        self.catalog.rename_device(new_name.clone()).await?;
        self.config.device_name = new_name;
        Ok(())
    }

    /// Start downloading `file_id` from `owner_id`.
    ///
    /// Returns false if the catalog has no such remote entry.
    pub async fn download(&mut self, file_id: &FileId, owner_id: &PeerId) -> Result<bool> {
        let sent = self
            .transfers
            .initiate(file_id, owner_id, self.catalog.store())
            .await?;
        if sent {
            self.catalog
                .set_overlay(file_id, owner_id, DownloadOverlay::downloading(0));
            self.notify(PeerNotice::CatalogChanged);
        }
        Ok(sent)
    }

    /// Abandon downloads that have gone quiet. Returns how many.
    pub fn evict_idle_downloads(&mut self) -> usize {
        let max_idle = match self.config.download_idle_timeout() {
            Some(max_idle) => max_idle,
            None => return 0,
        };
        let evicted = self.transfers.evict_idle(max_idle);
        for entry in &evicted {
            self.catalog
                .set_overlay(&entry.file_id, &entry.owner_id, DownloadOverlay::default());
            self.notify(PeerNotice::DownloadAbandoned {
                file_id: entry.file_id.clone(),
                owner_id: entry.owner_id.clone(),
            });
        }
        if !evicted.is_empty() {
            self.notify(PeerNotice::CatalogChanged);
        }
        evicted.len()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Event dispatch
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply one event from the relay.
    pub async fn handle_event(&mut self, event: Event) -> Result<()> {
        match event.kind {
            EventKind::Disconnect => {
                tracing::warn!("Relay dropped the connection");
                self.connection_lost();
            }
            EventKind::Connect | EventKind::Close => {
                tracing::debug!("Lifecycle event {}", event.kind);
            }
            kind if kind.is_catalog() => {
                if self.catalog.handle_event(&event) {
                    self.notify(PeerNotice::CatalogChanged);
                }
            }
            _ => {
                let outcome = self
                    .transfers
                    .handle_event(&event, self.catalog.store())
                    .await?;
                self.apply_outcome(outcome).await?;
            }
        }
        Ok(())
    }

    async fn apply_outcome(&mut self, outcome: TransferOutcome) -> Result<()> {
        match outcome {
            TransferOutcome::Ignored | TransferOutcome::Served => {}
            TransferOutcome::Progress {
                file_id,
                owner_id,
                percent,
            } => {
                self.catalog
                    .set_overlay(&file_id, &owner_id, DownloadOverlay::downloading(percent));
                self.notify(PeerNotice::DownloadProgress {
                    file_id,
                    owner_id,
                    percent,
                });
            }
            TransferOutcome::Completed(download) => {
                let file_id = download.file_id.clone();
                let owner_id = download.owner_id.clone();
                let file_name = download.file_name.clone();

                self.catalog
                    .set_overlay(&file_id, &owner_id, DownloadOverlay::completed());
                self.sink.save(download).await?;
                self.notify(PeerNotice::DownloadCompleted {
                    file_id,
                    owner_id,
                    file_name,
                });
                self.notify(PeerNotice::CatalogChanged);
            }
            TransferOutcome::Failed(failure) => {
                self.catalog.set_overlay(
                    &failure.file_id,
                    &failure.owner_id,
                    DownloadOverlay::default(),
                );
                let entry = self
                    .catalog
                    .store()
                    .get(&failure.file_id, &failure.owner_id)
                    .cloned();
                self.notify(PeerNotice::DownloadFailed { failure, entry });
                self.notify(PeerNotice::CatalogChanged);
            }
        }
        Ok(())
    }

    /// Handle every event already delivered. Returns how many.
    pub async fn pump(&mut self) -> Result<usize> {
        let mut handled = 0;
        while let Some(event) = self.channel.try_recv().await? {
            self.handle_event(event).await?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Serve events until `shutdown` resolves, then close.
    ///
    /// Reconnects when the relay drops the connection and sweeps idle
    /// downloads every `sweep_interval`. Errors from individual events are
    /// logged; failing to receive or to reconnect ends the loop.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let interval = self.config.sweep_interval();
        let mut last_sweep = Instant::now();

        loop {
            let received = tokio::select! {
                _ = &mut shutdown => break,
                received = self.channel.recv_timeout(interval) => received?,
            };

            if let Some(event) = received {
                let lost = event.kind == EventKind::Disconnect;
                if let Err(e) = self.handle_event(event).await {
                    tracing::warn!("Event handling failed: {}", e);
                }
                if lost {
                    self.connect().await?;
                }
            }

            if last_sweep.elapsed() >= interval {
                self.evict_idle_downloads();
                last_sweep = Instant::now();
            }
        }

        self.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectPolicy;
    use crate::sink::MemorySink;
    use dropline_sync::{MemoryChannel, MemoryRelay};
    use std::time::Duration;

    async fn peer(relay: &Arc<MemoryRelay>, config: PeerConfig) -> Peer<MemoryChannel, MemorySink> {
        Peer::new(relay.create_channel().await, MemorySink::new(), config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_backs_off() {
        let relay = MemoryRelay::new();
        let mut alice = peer(&relay, PeerConfig::default()).await;
        relay.refuse_next_connects(3).await;

        let started = Instant::now();
        alice.connect().await.unwrap();

        assert!(alice.is_connected());
        assert!(started.elapsed() >= Duration::from_millis(1_000 + 2_000 + 4_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up() {
        let relay = MemoryRelay::new();
        let config = PeerConfig {
            reconnect: ReconnectPolicy {
                max_attempts: 3,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut alice = peer(&relay, config).await;
        relay.refuse_next_connects(10).await;

        match alice.connect().await {
            Err(PeerError::ConnectFailed { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected ConnectFailed, got {:?}", other.map(|_| ())),
        }
        assert!(!alice.is_connected());
    }

    #[tokio::test]
    async fn test_connect_requests_listing() {
        let relay = MemoryRelay::new();
        let mut alice = peer(&relay, PeerConfig::default()).await;
        let mut notices = alice.subscribe_notices();

        alice.connect().await.unwrap();
        let reply = alice.channel().try_recv().await.unwrap().unwrap();
        assert_eq!(reply.kind, EventKind::RequestListedFiles);
        assert_eq!(notices.recv().await.unwrap(), PeerNotice::Connected);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let relay = MemoryRelay::new();
        let mut alice = peer(&relay, PeerConfig::default()).await;

        alice.close().await.unwrap();
        alice.connect().await.unwrap();
        alice.close().await.unwrap();
        assert!(!alice.is_connected());
        assert!(relay.connected_peers().await.is_empty());
        alice.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_download_of_unknown_file_is_noop() {
        let relay = MemoryRelay::new();
        let mut alice = peer(&relay, PeerConfig::default()).await;
        alice.connect().await.unwrap();
        alice.pump().await.unwrap();

        let sent = alice
            .download(&FileId::from("nope"), &PeerId::from("nobody"))
            .await
            .unwrap();
        assert!(!sent);
        assert_eq!(alice.transfer_state(&FileId::from("nope")), TransferState::Idle);
    }

    #[tokio::test]
    async fn test_rename_updates_config() {
        let relay = MemoryRelay::new();
        let mut alice = peer(&relay, PeerConfig::default()).await;
        alice.connect().await.unwrap();

        alice.rename_device("desk").await.unwrap();
        assert_eq!(alice.config().device_name, "desk");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let relay = MemoryRelay::new();
        let mut alice = peer(&relay, PeerConfig::default()).await;
        alice.connect().await.unwrap();

        alice
            .run(tokio::time::sleep(Duration::from_secs(30)))
            .await
            .unwrap();
        assert!(!alice.is_connected());
    }
}
