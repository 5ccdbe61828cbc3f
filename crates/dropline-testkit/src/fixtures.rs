//! Test fixtures and helpers.
//!
//! A [`TestNetwork`] is an in-memory relay plus a way to attach peers to it.
//! Peers do not run background loops in tests; [`settle`] pumps them until no
//! events are left in flight.

use std::sync::Arc;

use dropline::{MemorySink, Peer, PeerConfig, Result};
use dropline_core::{LocalFile, PeerId};
use dropline_sync::{MemoryChannel, MemoryRelay};

/// A peer on the in-memory relay.
pub type TestPeer = Peer<MemoryChannel, MemorySink>;

/// An in-memory relay that test peers attach to.
pub struct TestNetwork {
    pub relay: Arc<MemoryRelay>,
}

impl TestNetwork {
    pub fn new() -> Self {
        Self {
            relay: MemoryRelay::new(),
        }
    }

    /// A disconnected peer whose id is `name`.
    pub async fn peer(&self, name: &str, config: PeerConfig) -> TestPeer {
        let channel = self.relay.create_channel_with_id(PeerId::from(name)).await;
        let config = PeerConfig {
            device_name: format!("{}-device", name),
            ..config
        };
        Peer::new(channel, MemorySink::new(), config)
    }

    /// A peer that has connected and taken in the relay's listing.
    pub async fn connected_peer(&self, name: &str, config: PeerConfig) -> Result<TestPeer> {
        let mut peer = self.peer(name, config).await;
        peer.connect().await?;
        peer.pump().await?;
        Ok(peer)
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// Pump every peer until none has anything left to handle.
///
/// Returns the number of events handled.
pub async fn settle(peers: &mut [&mut TestPeer]) -> Result<usize> {
    let mut total = 0;
    loop {
        let mut handled = 0;
        for peer in peers.iter_mut() {
            handled += peer.pump().await?;
        }
        if handled == 0 {
            return Ok(total);
        }
        total += handled;
    }
}

/// Default config with a small chunk size so transfers span several chunks.
pub fn test_config(chunk_size: usize) -> PeerConfig {
    PeerConfig {
        chunk_size,
        ..PeerConfig::default()
    }
}

/// A file of `len` deterministic bytes.
pub fn sample_file(name: &str, len: usize) -> LocalFile {
    let bytes: Vec<u8> = (0..len).map(|i| (i * 31 + 7) as u8).collect();
    LocalFile::new(name, "application/octet-stream", bytes)
}

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .try_init();
}
