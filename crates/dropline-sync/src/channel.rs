//! Channel abstraction: the connection to the relay.
//!
//! The relay is an opaque message bus. A channel emits events to it, either
//! for the relay to fan out or addressed to one peer, and receives the events
//! the relay delivers. Subscriptions act as per-kind delivery filters; the
//! handlers themselves live with whoever drains the channel.

use std::time::Duration;

use async_trait::async_trait;

use dropline_core::PeerId;

use crate::error::Result;
use crate::messages::{Event, EventKind};

/// A peer's single, shared connection to the relay.
///
/// Implementations must be thread-safe (Send + Sync). Emitting is
/// fire-and-forget: the relay is assumed reliable and ordered.
#[async_trait]
pub trait Channel: Send + Sync {
    /// This connection's id, as other peers see it.
    fn local_peer_id(&self) -> PeerId;

    /// Open the connection.
    async fn connect(&self) -> Result<()>;

    /// Tear the connection down.
    async fn disconnect(&self) -> Result<()>;

    /// Send an event to the relay, which fans it out or serves it.
    async fn emit(&self, event: Event) -> Result<()>;

    /// Send an event to one specific peer.
    async fn emit_to(&self, peer: &PeerId, event: Event) -> Result<()>;

    /// Start receiving events of `kind`.
    async fn subscribe(&self, kind: EventKind) -> Result<()>;

    /// Stop receiving events of `kind`.
    async fn unsubscribe(&self, kind: EventKind) -> Result<()>;

    /// Receive the next delivered event.
    ///
    /// Blocks until an event is available or an error occurs.
    async fn recv(&self) -> Result<Event>;

    /// Receive with timeout.
    ///
    /// Returns None if timeout expires before an event arrives.
    async fn recv_timeout(&self, timeout: Duration) -> Result<Option<Event>>;

    /// Receive an already-delivered event without waiting.
    async fn try_recv(&self) -> Result<Option<Event>>;
}

/// An in-memory relay for testing.
///
/// Behaves like the real relay closely enough to drive the engines end to
/// end: it keeps a snapshot of the listed files, answers listing requests,
/// announces departures, and tallies completed downloads.
pub mod memory {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;

    use tokio::sync::{mpsc, Mutex, RwLock};

    use dropline_core::{CatalogEntry, FileId};

    use crate::error::SyncError;
    use crate::messages::{
        ChunkEnvelope, ChunkRequest, ClientGone, DeviceRename, DownloadRequest, FileRef,
        OwnerRef, PasswordChange, TotalDownloads,
    };

    /// One registered peer.
    struct Slot {
        sender: mpsc::UnboundedSender<Event>,
        subscriptions: HashSet<EventKind>,
        connected: bool,
    }

    #[derive(Default)]
    struct RelayState {
        slots: HashMap<PeerId, Slot>,
        /// What a newly connected peer receives for `request-listed-files`.
        listed: Vec<CatalogEntry>,
        /// Completed downloads per content id.
        tallies: HashMap<FileId, u64>,
        /// Connection attempts still to refuse.
        refuse_connects: u32,
    }

    impl RelayState {
        fn is_connected(&self, peer: &PeerId) -> bool {
            self.slots.get(peer).map_or(false, |s| s.connected)
        }

        /// Deliver to one peer if it is connected and listening.
        fn deliver(&self, to: &PeerId, event: Event) -> bool {
            match self.slots.get(to) {
                Some(slot)
                    if slot.connected
                        && (event.kind.is_lifecycle()
                            || slot.subscriptions.contains(&event.kind)) =>
                {
                    slot.sender.send(event).is_ok()
                }
                _ => false,
            }
        }

        /// Deliver to every listening peer, sender included.
        fn fan_out(&self, event: &Event) {
            for peer in self.slots.keys() {
                self.deliver(peer, event.clone());
            }
        }

        /// Mirror a catalog event into the listing snapshot.
        fn apply(&mut self, event: &Event) {
            match event.kind {
                EventKind::ListFile => {
                    if let Ok(entry) = event.decode::<CatalogEntry>() {
                        self.listed
                            .retain(|e| !(e.id == entry.id && e.owner_id == entry.owner_id));
                        self.listed.push(entry);
                    }
                }
                EventKind::DeleteFile => {
                    if let Ok(FileRef { file_id }) = event.decode() {
                        self.listed.retain(|e| e.id != file_id);
                    }
                }
                EventKind::DeleteAllFiles => {
                    if let Ok(OwnerRef { owner_id }) = event.decode() {
                        self.listed.retain(|e| e.owner_id != owner_id);
                    }
                }
                EventKind::ChangePassword | EventKind::RemovePassword => {
                    if let Ok(PasswordChange { file_id, owner_id }) = event.decode() {
                        let flag = event.kind == EventKind::ChangePassword;
                        for e in self
                            .listed
                            .iter_mut()
                            .filter(|e| e.id == file_id && e.owner_id == owner_id)
                        {
                            e.with_password = flag;
                        }
                    }
                }
                EventKind::UpdateDeviceName => {
                    if let Ok(DeviceRename { new_device_name, owner_id }) = event.decode() {
                        for e in self.listed.iter_mut().filter(|e| e.owner_id == owner_id) {
                            e.device_name = new_device_name.clone();
                        }
                    }
                }
                _ => {}
            }
        }

        /// Forget a peer's connection and announce its departure.
        fn unregister(&mut self, peer: &PeerId) -> Result<bool> {
            let slot = match self.slots.get_mut(peer) {
                Some(slot) if slot.connected => slot,
                _ => return Ok(false),
            };
            slot.connected = false;
            slot.subscriptions.clear();

            self.listed.retain(|e| &e.owner_id != peer);
            let gone = Event::encode(EventKind::ClientDisconnect, &ClientGone { id: peer.clone() })?;
            self.fan_out(&gone);
            tracing::debug!("Relay: {} disconnected", peer);
            Ok(true)
        }

        /// Deliver an addressed event, tallying completed downloads.
        fn route(&mut self, to: &PeerId, event: Event) -> Result<()> {
            let finished = if event.kind == EventKind::UploadFileChunk {
                event
                    .decode::<ChunkEnvelope>()
                    .ok()
                    .filter(ChunkEnvelope::is_final)
                    .map(|envelope| envelope.file_id)
            } else {
                None
            };

            if !self.deliver(to, event) {
                tracing::debug!("Relay: {} is not listening, event dropped", to);
            }

            if let Some(file_id) = finished {
                let tally = self.tallies.entry(file_id.clone()).or_insert(0);
                *tally += 1;
                let update = Event::encode(
                    EventKind::UpdateTotalDownloads,
                    &TotalDownloads {
                        file_id: file_id.clone(),
                        total_downloads: *tally,
                    },
                )?;
                for e in self.listed.iter_mut().filter(|e| e.id == file_id) {
                    e.total_downloads = *tally;
                }
                self.fan_out(&update);
            }
            Ok(())
        }
    }

    /// Shared state for the in-memory relay.
    pub struct MemoryRelay {
        state: RwLock<RelayState>,
    }

    impl MemoryRelay {
        /// Create a new in-memory relay.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Create a channel with a fresh random peer id.
        pub async fn create_channel(self: &Arc<Self>) -> MemoryChannel {
            self.create_channel_with_id(PeerId::random()).await
        }

        /// Create a channel for a known peer id.
        pub async fn create_channel_with_id(self: &Arc<Self>, peer_id: PeerId) -> MemoryChannel {
            let (tx, rx) = mpsc::unbounded_channel();

            self.state.write().await.slots.insert(
                peer_id.clone(),
                Slot {
                    sender: tx,
                    subscriptions: HashSet::new(),
                    connected: false,
                },
            );

            MemoryChannel {
                peer_id,
                relay: Arc::clone(self),
                receiver: Mutex::new(rx),
            }
        }

        /// Refuse the next `count` connection attempts.
        pub async fn refuse_next_connects(&self, count: u32) {
            self.state.write().await.refuse_connects = count;
        }

        /// Drop a peer from the relay side, as a lost connection would.
        pub async fn drop_peer(&self, peer: &PeerId) -> Result<()> {
            let mut state = self.state.write().await;
            state.deliver(peer, Event::empty(EventKind::Disconnect));
            state.unregister(peer)?;
            Ok(())
        }

        /// The relay's current listing snapshot.
        pub async fn listed_files(&self) -> Vec<CatalogEntry> {
            self.state.read().await.listed.clone()
        }

        /// Completed downloads counted for `file_id`.
        pub async fn total_downloads(&self, file_id: &FileId) -> u64 {
            self.state
                .read()
                .await
                .tallies
                .get(file_id)
                .copied()
                .unwrap_or(0)
        }

        /// Peers currently connected.
        pub async fn connected_peers(&self) -> Vec<PeerId> {
            self.state
                .read()
                .await
                .slots
                .iter()
                .filter(|(_, s)| s.connected)
                .map(|(id, _)| id.clone())
                .collect()
        }
    }

    impl Default for MemoryRelay {
        fn default() -> Self {
            Self {
                state: RwLock::new(RelayState::default()),
            }
        }
    }

    /// In-memory channel implementation.
    pub struct MemoryChannel {
        peer_id: PeerId,
        relay: Arc<MemoryRelay>,
        receiver: Mutex<mpsc::UnboundedReceiver<Event>>,
    }

    impl MemoryChannel {
        /// The relay this channel is attached to.
        pub fn relay(&self) -> &Arc<MemoryRelay> {
            &self.relay
        }
    }

    #[async_trait]
    impl Channel for MemoryChannel {
        fn local_peer_id(&self) -> PeerId {
            self.peer_id.clone()
        }

        async fn connect(&self) -> Result<()> {
            let mut state = self.relay.state.write().await;
            if state.refuse_connects > 0 {
                state.refuse_connects -= 1;
                return Err(SyncError::TransportError("connection refused".into()));
            }
            match state.slots.get_mut(&self.peer_id) {
                Some(slot) => {
                    slot.connected = true;
                    Ok(())
                }
                None => Err(SyncError::TransportError("unknown peer".into())),
            }
        }

        async fn disconnect(&self) -> Result<()> {
            self.relay.state.write().await.unregister(&self.peer_id)?;
            Ok(())
        }

        async fn emit(&self, event: Event) -> Result<()> {
            let mut state = self.relay.state.write().await;
            if !state.is_connected(&self.peer_id) {
                return Err(SyncError::NotConnected);
            }

            match event.kind {
                EventKind::RequestListedFiles => {
                    let reply = Event::encode(EventKind::RequestListedFiles, &state.listed)?;
                    state.deliver(&self.peer_id, reply);
                }
                EventKind::Close => {
                    state.unregister(&self.peer_id)?;
                }
                EventKind::DownloadFile => {
                    let DownloadRequest { owner_id, .. } = event.decode()?;
                    state.route(&owner_id, event)?;
                }
                EventKind::RequestFileChunk => {
                    let ChunkRequest { owner_id, .. } = event.decode()?;
                    state.route(&owner_id, event)?;
                }
                EventKind::UploadFileChunk => {
                    let ChunkEnvelope { target_id, .. } = event.decode()?;
                    state.route(&target_id, event)?;
                }
                kind if kind.is_catalog() => {
                    if matches!(
                        kind,
                        EventKind::ClientDisconnect | EventKind::UpdateTotalDownloads
                    ) {
                        tracing::debug!("Relay: ignoring relay-only event {} from a peer", kind);
                        return Ok(());
                    }
                    state.apply(&event);
                    state.fan_out(&event);
                }
                kind => {
                    tracing::debug!("Relay: ignoring {} from {}", kind, self.peer_id);
                }
            }
            Ok(())
        }

        async fn emit_to(&self, peer: &PeerId, event: Event) -> Result<()> {
            let mut state = self.relay.state.write().await;
            if !state.is_connected(&self.peer_id) {
                return Err(SyncError::NotConnected);
            }
            state.route(peer, event)
        }

        async fn subscribe(&self, kind: EventKind) -> Result<()> {
            let mut state = self.relay.state.write().await;
            match state.slots.get_mut(&self.peer_id) {
                Some(slot) => {
                    slot.subscriptions.insert(kind);
                    Ok(())
                }
                None => Err(SyncError::NotConnected),
            }
        }

        async fn unsubscribe(&self, kind: EventKind) -> Result<()> {
            let mut state = self.relay.state.write().await;
            if let Some(slot) = state.slots.get_mut(&self.peer_id) {
                slot.subscriptions.remove(&kind);
            }
            Ok(())
        }

        async fn recv(&self) -> Result<Event> {
            let mut rx = self.receiver.lock().await;
            rx.recv()
                .await
                .ok_or_else(|| SyncError::TransportError("channel closed".into()))
        }

        async fn recv_timeout(&self, timeout: Duration) -> Result<Option<Event>> {
            let mut rx = self.receiver.lock().await;
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(event)) => Ok(Some(event)),
                Ok(None) => Err(SyncError::TransportError("channel closed".into())),
                Err(_) => Ok(None), // Timeout
            }
        }

        async fn try_recv(&self) -> Result<Option<Event>> {
            let mut rx = self.receiver.lock().await;
            match rx.try_recv() {
                Ok(event) => Ok(Some(event)),
                Err(mpsc::error::TryRecvError::Empty) => Ok(None),
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    Err(SyncError::TransportError("channel closed".into()))
                }
            }
        }
    }
}
