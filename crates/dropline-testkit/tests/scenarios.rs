//! End-to-end scenarios: several peers on one in-memory relay.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;

use dropline::{IntegrityFailure, PeerConfig, PeerNotice};
use dropline_core::{DownloadOverlay, FileId, PeerId};
use dropline_store::TransferState;
use dropline_sync::{ChunkEnvelope, Event, EventKind};
use dropline_testkit::{init_tracing, sample_file, settle, test_config, TestNetwork, TestPeer};

fn drain(notices: &mut broadcast::Receiver<PeerNotice>) -> Vec<PeerNotice> {
    let mut seen = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        seen.push(notice);
    }
    seen
}

fn overlay(peer: &TestPeer, file_id: &FileId, owner: &str) -> DownloadOverlay {
    peer.catalog()
        .get(file_id, &PeerId::from(owner))
        .map(|e| e.overlay)
        .unwrap_or_default()
}

#[tokio::test]
async fn test_single_chunk_download() -> anyhow::Result<()> {
    init_tracing();
    let network = TestNetwork::new();
    let mut alice = network.connected_peer("alice", test_config(64)).await?;
    let mut bob = network.connected_peer("bob", test_config(64)).await?;

    let file = sample_file("ten.bin", 10);
    let listed = alice.share_files(vec![file.clone()]).await?;
    assert_eq!(listed[0].total_chunks(), 1);
    settle(&mut [&mut alice, &mut bob]).await?;

    let id = listed[0].id.clone();
    assert!(bob.download(&id, &PeerId::from("alice")).await?);
    assert_eq!(bob.transfer_state(&id), TransferState::Requested);
    settle(&mut [&mut alice, &mut bob]).await?;

    let saved = bob.sink().saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].bytes, file.bytes);
    assert_eq!(saved[0].file_name, "ten.bin");
    assert_eq!(overlay(&bob, &id, "alice"), DownloadOverlay::completed());
    assert_eq!(bob.transfer_state(&id), TransferState::Completed);
    assert!(bob.downloads().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_three_chunk_download_reports_progress() -> anyhow::Result<()> {
    let network = TestNetwork::new();
    let mut alice = network.connected_peer("alice", test_config(4)).await?;
    let mut bob = network.connected_peer("bob", test_config(4)).await?;

    let listed = alice.share_files(vec![sample_file("twelve.bin", 12)]).await?;
    assert_eq!(listed[0].total_chunks(), 3);
    settle(&mut [&mut alice, &mut bob]).await?;

    let id = listed[0].id.clone();
    let mut notices = bob.subscribe_notices();
    bob.download(&id, &PeerId::from("alice")).await?;
    assert_eq!(overlay(&bob, &id, "alice"), DownloadOverlay::downloading(0));
    settle(&mut [&mut alice, &mut bob]).await?;

    let seen = drain(&mut notices);
    let percents: Vec<u8> = seen
        .iter()
        .filter_map(|n| match n {
            PeerNotice::DownloadProgress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect();
    assert_eq!(percents, vec![33, 67]);
    assert!(seen
        .iter()
        .any(|n| matches!(n, PeerNotice::DownloadCompleted { file_name, .. } if file_name == "twelve.bin")));

    let done = overlay(&bob, &id, "alice");
    assert!(done.completed);
    assert!(!done.is_downloading);
    assert_eq!(done.percent, 100);
    assert!(bob.downloads().is_empty());
    assert_eq!(bob.sink().saved()[0].bytes.len(), 12);
    Ok(())
}

#[tokio::test]
async fn test_corrupted_final_chunk_surfaces_integrity_error() -> anyhow::Result<()> {
    let network = TestNetwork::new();
    let mut alice = network.connected_peer("alice", test_config(4)).await?;
    let mut bob = network.connected_peer("bob", test_config(4)).await?;

    let listed = alice.share_files(vec![sample_file("eight.bin", 8)]).await?;
    settle(&mut [&mut alice, &mut bob]).await?;
    let entry = listed[0].clone();

    let mut notices = bob.subscribe_notices();
    bob.download(&entry.id, &entry.owner_id).await?;

    let envelope = |index: u32, chunk: Bytes| ChunkEnvelope {
        chunk,
        current_chunk: index,
        total_chunks: 2,
        file_id: entry.id.clone(),
        file_name: entry.file_name.clone(),
        file_size: entry.file_size,
        owner_id: entry.owner_id.clone(),
        target_id: bob.id(),
        file_type: entry.file_type.clone(),
    };
    let first = envelope(1, entry.chunks[0].clone());
    let corrupted = envelope(2, Bytes::from_static(b"\0\0\0\0"));

    bob.handle_event(Event::encode(EventKind::UploadFileChunk, &first)?)
        .await?;
    assert_eq!(overlay(&bob, &entry.id, "alice"), DownloadOverlay::downloading(50));
    bob.handle_event(Event::encode(EventKind::UploadFileChunk, &corrupted)?)
        .await?;

    assert!(bob.downloads().is_empty());
    assert_eq!(bob.transfer_state(&entry.id), TransferState::Failed);
    let reset = overlay(&bob, &entry.id, "alice");
    assert_eq!(reset.percent, 0);
    assert!(!reset.is_downloading);
    assert!(!reset.completed);
    assert!(bob.sink().saved().is_empty());

    let failure = drain(&mut notices)
        .into_iter()
        .find_map(|n| match n {
            PeerNotice::DownloadFailed { failure, entry } => Some((failure, entry)),
            _ => None,
        });
    let (failure, failed_entry) = failure.expect("integrity failure notice");
    assert_eq!(failure.file_id, entry.id);
    assert_eq!(failure.file_name, "eight.bin");
    assert!(failure.to_string().starts_with(IntegrityFailure::MESSAGE));
    assert_eq!(failed_entry.map(|e| e.file_name), Some("eight.bin".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_client_disconnect_purges_only_that_owner() -> anyhow::Result<()> {
    let network = TestNetwork::new();
    let config = test_config(16);
    let mut alice = network.connected_peer("alice", config.clone()).await?;
    let mut bob = network.connected_peer("bob", config.clone()).await?;
    let mut carol = network.connected_peer("carol", config).await?;

    alice
        .share_files(vec![sample_file("a1", 5), sample_file("a2", 6)])
        .await?;
    carol.share_files(vec![sample_file("c1", 7)]).await?;
    settle(&mut [&mut alice, &mut bob, &mut carol]).await?;
    assert_eq!(bob.catalog().len(), 3);

    alice.close().await?;
    settle(&mut [&mut bob, &mut carol]).await?;

    let owners: Vec<PeerId> = bob.snapshot().into_iter().map(|e| e.owner_id).collect();
    assert_eq!(owners, vec![PeerId::from("carol")]);
    assert_eq!(carol.catalog().len(), 1);
    assert!(network.relay.listed_files().await.iter().all(|e| e.owner_id != PeerId::from("alice")));
    Ok(())
}

#[tokio::test]
async fn test_download_tally_updates_every_owner() -> anyhow::Result<()> {
    let network = TestNetwork::new();
    let config = test_config(4);
    let mut alice = network.connected_peer("alice", config.clone()).await?;
    let mut bob = network.connected_peer("bob", config.clone()).await?;
    let mut carol = network.connected_peer("carol", config).await?;

    // Same bytes shared by two owners: one content id, two entries.
    let listed = alice.share_files(vec![sample_file("same.bin", 10)]).await?;
    carol.share_files(vec![sample_file("same.bin", 10)]).await?;
    settle(&mut [&mut alice, &mut bob, &mut carol]).await?;
    let id = listed[0].id.clone();
    assert_eq!(bob.catalog().len(), 2);

    bob.download(&id, &PeerId::from("alice")).await?;
    settle(&mut [&mut alice, &mut bob, &mut carol]).await?;

    assert_eq!(network.relay.total_downloads(&id).await, 1);
    for peer in [&alice, &bob, &carol] {
        let totals: Vec<u64> = peer.snapshot().iter().map(|e| e.total_downloads).collect();
        assert_eq!(totals, vec![1, 1]);
    }
    Ok(())
}

#[tokio::test]
async fn test_sharing_same_file_twice_lists_nothing() -> anyhow::Result<()> {
    let network = TestNetwork::new();
    let mut alice = network.connected_peer("alice", test_config(4)).await?;
    let mut bob = network.connected_peer("bob", test_config(4)).await?;

    let file = sample_file("dup.bin", 9);
    assert_eq!(alice.share_files(vec![file.clone()]).await?.len(), 1);
    settle(&mut [&mut alice, &mut bob]).await?;

    assert!(alice.share_files(vec![file]).await?.is_empty());
    settle(&mut [&mut alice, &mut bob]).await?;
    assert_eq!(alice.catalog().len(), 1);
    assert_eq!(bob.catalog().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_oversize_files_are_not_shared() -> anyhow::Result<()> {
    let network = TestNetwork::new();
    let config = PeerConfig {
        max_file_size: 10,
        ..test_config(4)
    };
    let mut alice = network.connected_peer("alice", config).await?;

    let listed = alice
        .share_files(vec![sample_file("small", 9), sample_file("limit", 10)])
        .await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].file_name, "small");
    Ok(())
}

#[tokio::test]
async fn test_malformed_events_change_nothing() -> anyhow::Result<()> {
    let network = TestNetwork::new();
    let mut alice = network.connected_peer("alice", test_config(4)).await?;
    let mut bob = network.connected_peer("bob", test_config(4)).await?;
    alice.share_files(vec![sample_file("keep.bin", 8)]).await?;
    settle(&mut [&mut alice, &mut bob]).await?;
    let before = bob.snapshot();

    let garbage = Bytes::from_static(b"\xff\xfe not cbor");
    for kind in EventKind::HANDLED {
        bob.handle_event(Event {
            kind,
            payload: garbage.clone(),
        })
        .await?;
        bob.handle_event(Event::empty(kind)).await?;
    }

    assert_eq!(bob.snapshot(), before);
    assert!(bob.downloads().is_empty());
    assert!(bob.sink().saved().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_owner_actions_reach_other_peers() -> anyhow::Result<()> {
    let network = TestNetwork::new();
    let mut alice = network.connected_peer("alice", test_config(4)).await?;
    let mut bob = network.connected_peer("bob", test_config(4)).await?;
    let listed = alice
        .share_files(vec![sample_file("one", 3), sample_file("two", 4)])
        .await?;
    settle(&mut [&mut alice, &mut bob]).await?;

    assert!(alice.set_password(&listed[0].id, true).await?);
    alice.rename_device("studio").await?;
    settle(&mut [&mut alice, &mut bob]).await?;

    let mirrored = bob.catalog().get(&listed[0].id, &PeerId::from("alice")).unwrap();
    assert!(mirrored.with_password);
    assert!(bob.snapshot().iter().all(|e| e.device_name == "studio"));

    // Future shares carry the new name too.
    let later = alice.share_files(vec![sample_file("three", 5)]).await?;
    assert_eq!(later[0].device_name, "studio");
    settle(&mut [&mut alice, &mut bob]).await?;

    assert!(alice.set_password(&listed[0].id, false).await?);
    assert!(alice.delete_file(&listed[1].id).await?);
    settle(&mut [&mut alice, &mut bob]).await?;
    assert!(!bob.catalog().get(&listed[0].id, &PeerId::from("alice")).unwrap().with_password);
    assert_eq!(bob.catalog().len(), 2);

    alice.delete_all_files().await?;
    settle(&mut [&mut alice, &mut bob]).await?;
    assert!(alice.catalog().is_empty());
    assert!(bob.catalog().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_dropped_connection_abandons_download() -> anyhow::Result<()> {
    let network = TestNetwork::new();
    let mut alice = network.connected_peer("alice", test_config(4)).await?;
    let mut bob = network.connected_peer("bob", test_config(4)).await?;
    let listed = alice.share_files(vec![sample_file("big.bin", 16)]).await?;
    settle(&mut [&mut alice, &mut bob]).await?;
    let id = listed[0].id.clone();

    bob.download(&id, &PeerId::from("alice")).await?;
    alice.pump().await?; // serves chunk 1
    bob.pump().await?; // takes chunk 1, asks for chunk 2
    assert_eq!(bob.downloads().len(), 1);

    let mut notices = bob.subscribe_notices();
    network.relay.drop_peer(&bob.id()).await?;
    bob.pump().await?;

    assert!(!bob.is_connected());
    assert!(bob.downloads().is_empty());
    assert!(!overlay(&bob, &id, "alice").is_downloading);
    let seen = drain(&mut notices);
    assert!(seen.contains(&PeerNotice::DownloadAbandoned {
        file_id: id.clone(),
        owner_id: PeerId::from("alice"),
    }));
    assert!(seen.contains(&PeerNotice::Disconnected));

    // Alice saw bob leave; bob listed nothing, so her catalog is unchanged.
    settle(&mut [&mut alice]).await?;
    assert_eq!(alice.catalog().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_rehydrates_catalog() -> anyhow::Result<()> {
    let network = TestNetwork::new();
    let mut alice = network.connected_peer("alice", test_config(4)).await?;
    let mut bob = network.connected_peer("bob", test_config(4)).await?;
    alice.share_files(vec![sample_file("a.bin", 8)]).await?;
    settle(&mut [&mut alice, &mut bob]).await?;

    network.relay.drop_peer(&bob.id()).await?;
    bob.pump().await?;
    assert!(!bob.is_connected());

    network.relay.refuse_next_connects(2).await;
    let started = tokio::time::Instant::now();
    bob.connect().await?;
    assert!(started.elapsed() >= Duration::from_millis(3_000));

    // Mirror was cleared and comes back from the relay's listing.
    assert!(bob.catalog().is_empty());
    bob.pump().await?;
    assert_eq!(bob.catalog().len(), 1);
    assert_eq!(bob.snapshot()[0].owner_id, PeerId::from("alice"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_idle_download_is_evicted() -> anyhow::Result<()> {
    let network = TestNetwork::new();
    let config = PeerConfig {
        download_idle_timeout_ms: Some(1_000),
        ..test_config(4)
    };
    let mut alice = network.connected_peer("alice", config.clone()).await?;
    let mut bob = network.connected_peer("bob", config).await?;
    let listed = alice.share_files(vec![sample_file("slow.bin", 12)]).await?;
    settle(&mut [&mut alice, &mut bob]).await?;
    let id = listed[0].id.clone();

    bob.download(&id, &PeerId::from("alice")).await?;
    alice.pump().await?;
    bob.pump().await?;
    assert_eq!(bob.evict_idle_downloads(), 0);

    // Alice never answers the request for chunk 2.
    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(bob.evict_idle_downloads(), 1);
    assert!(bob.downloads().is_empty());
    assert_eq!(bob.transfer_state(&id), TransferState::Failed);
    assert_eq!(overlay(&bob, &id, "alice"), DownloadOverlay::default());
    Ok(())
}

#[tokio::test]
async fn test_owner_cannot_download_own_file() -> anyhow::Result<()> {
    let network = TestNetwork::new();
    let mut alice = network.connected_peer("alice", test_config(4)).await?;
    let listed = alice.share_files(vec![sample_file("mine", 4)]).await?;
    settle(&mut [&mut alice]).await?;

    let entry = alice.catalog().find_owned(&listed[0].id).unwrap();
    assert!(entry.is_owner);
    assert_eq!(entry.total_chunks(), 1);
    assert!(!alice.download(&listed[0].id, &alice.id()).await?);
    Ok(())
}
