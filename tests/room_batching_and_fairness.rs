//! Spec §8 scenarios around room batching: direct-peer capacity, queue
//! progression once a batch completes, and a disconnect mid-batch not
//! blocking the remaining peers. Driven purely through `SenderSession`'s
//! public API, since `Room` itself is a private implementation detail.

use std::sync::Arc;

use meshdrop_integration_tests::harness::drive_to_completion;
use meshdrop_session::loopback::LoopbackLink;
use meshdrop_session::{Manifest, PeerLink, ReceiverSession, SenderSession, SessionConfig, SessionEvent};
use tempfile::tempdir;
use tokio::sync::mpsc;

struct ReceiverFixture {
    peer_id: String,
    receiver: ReceiverSession,
    link_b: LoopbackLink,
    dst_dir: tempfile::TempDir,
}

/// Builds one `ReceiverSession` + loopback link pair and admits it into
/// `sender`'s room, without marking it ready yet.
async fn admit_receiver(sender: &Arc<SenderSession>, manifest: &Manifest, peer_id: &str) -> ReceiverFixture {
    let dst_dir = tempdir().unwrap();
    let (recv_events_tx, _recv_events_rx) = mpsc::unbounded_channel();
    let receiver = ReceiverSession::open(manifest.clone(), dst_dir.path(), 8, recv_events_tx).unwrap();
    let (link_a, link_b) = LoopbackLink::pair();
    sender.admit_peer(peer_id.to_string(), Box::new(link_a), None, [0u8; 4]).await;
    receiver.add_source(peer_id.to_string(), None);
    ReceiverFixture {
        peer_id: peer_id.to_string(),
        receiver,
        link_b,
        dst_dir,
    }
}

fn small_file_manifest(src_dir: &std::path::Path, name: &str, contents: &[u8]) -> Manifest {
    std::fs::write(src_dir.join(name), contents).unwrap();
    Manifest::single_file(format!("t-{name}"), name.to_string(), contents.len() as u64, "text/plain".into(), 1_048_576)
}

/// Two peers admitted together fit in one batch (`max_direct_peers` default
/// is 4); both should receive the same bytes and complete independently.
#[tokio::test]
async fn two_peers_in_one_batch_both_complete() {
    let src_dir = tempdir().unwrap();
    let manifest = small_file_manifest(src_dir.path(), "shared.txt", b"shared payload");

    let mut config = SessionConfig::default();
    config.all_ready_countdown_ms = 20;
    let (sender_events_tx, _rx) = mpsc::unbounded_channel();
    let sender = SenderSession::new(manifest.clone(), config, sender_events_tx);
    sender.set_single_file_source(src_dir.path().join("shared.txt"));

    let mut r1 = admit_receiver(&sender, &manifest, "peer-1").await;
    let mut r2 = admit_receiver(&sender, &manifest, "peer-2").await;

    sender.mark_peer_ready(&r1.peer_id).await;
    sender.mark_peer_ready(&r2.peer_id).await;
    Arc::clone(&sender).try_start_batch().await.unwrap();

    drive_to_completion(&sender, &r1.receiver, &r1.peer_id, &mut r1.link_b).await.unwrap();
    drive_to_completion(&sender, &r2.receiver, &r2.peer_id, &mut r2.link_b).await.unwrap();

    assert_eq!(r1.receiver.finish(&r1.peer_id).await.unwrap(), 14);
    assert_eq!(r2.receiver.finish(&r2.peer_id).await.unwrap(), 14);
    assert_eq!(std::fs::read(r1.dst_dir.path().join("shared.txt")).unwrap(), b"shared payload");
    assert_eq!(std::fs::read(r2.dst_dir.path().join("shared.txt")).unwrap(), b"shared payload");
}

/// With `max_direct_peers = 2`, a third and fourth peer admitted while the
/// first batch is transferring must queue rather than join it, then start
/// their own batch once the first completes (spec §8 scenario 6, "queue
/// progression" — late arrivals go to the queue, not the running batch).
#[tokio::test]
async fn third_and_fourth_peers_queue_until_first_batch_completes() {
    let src_dir = tempdir().unwrap();
    let manifest = small_file_manifest(src_dir.path(), "queued.txt", b"queue me");

    let mut config = SessionConfig::default();
    config.all_ready_countdown_ms = 20;
    config.max_direct_peers = 2;
    let (sender_events_tx, mut sender_events_rx) = mpsc::unbounded_channel();
    let sender = SenderSession::new(manifest.clone(), config, sender_events_tx);
    sender.set_single_file_source(src_dir.path().join("queued.txt"));

    let mut r1 = admit_receiver(&sender, &manifest, "peer-1").await;
    let mut r2 = admit_receiver(&sender, &manifest, "peer-2").await;

    sender.mark_peer_ready(&r1.peer_id).await;
    sender.mark_peer_ready(&r2.peer_id).await;
    // Start the first batch explicitly so r3/r4's admission below is
    // guaranteed to observe `Transferring`, rather than racing the
    // auto-spawned countdown task.
    Arc::clone(&sender).try_start_batch().await.unwrap();

    // Admitted only now, these two see the room already `Transferring` and
    // so are queued instead of joining the first batch.
    let mut r3 = admit_receiver(&sender, &manifest, "peer-3").await;
    let mut r4 = admit_receiver(&sender, &manifest, "peer-4").await;
    sender.mark_peer_ready(&r3.peer_id).await;
    sender.mark_peer_ready(&r4.peer_id).await;

    // Draining r1/r2 completes the first batch, which pulls r3/r4 off the
    // queue and auto-starts the second batch.
    drive_to_completion(&sender, &r1.receiver, &r1.peer_id, &mut r1.link_b).await.unwrap();
    drive_to_completion(&sender, &r2.receiver, &r2.peer_id, &mut r2.link_b).await.unwrap();

    drive_to_completion(&sender, &r3.receiver, &r3.peer_id, &mut r3.link_b).await.unwrap();
    drive_to_completion(&sender, &r4.receiver, &r4.peer_id, &mut r4.link_b).await.unwrap();

    for fixture in [&r1, &r2, &r3, &r4] {
        assert_eq!(fixture.receiver.finish(&fixture.peer_id).await.unwrap(), 8);
        assert_eq!(std::fs::read(fixture.dst_dir.path().join("queued.txt")).unwrap(), b"queue me");
    }

    let mut joined = 0;
    let mut completed = 0;
    while let Ok(event) = sender_events_rx.try_recv() {
        match event {
            SessionEvent::PeerJoined { .. } => joined += 1,
            SessionEvent::PeerComplete { .. } => completed += 1,
            _ => {}
        }
    }
    assert_eq!(joined, 4);
    assert_eq!(completed, 4);
}

/// A peer that disconnects mid-batch doesn't block the others; once
/// rejoined it lands back in the queue rather than the batch already in
/// flight.
#[tokio::test]
async fn disconnected_peer_does_not_block_the_rest_of_the_batch() {
    let src_dir = tempdir().unwrap();
    let manifest = small_file_manifest(src_dir.path(), "resilient.txt", b"still going");

    let mut config = SessionConfig::default();
    config.all_ready_countdown_ms = 20;
    let (sender_events_tx, mut sender_events_rx) = mpsc::unbounded_channel();
    let sender = SenderSession::new(manifest.clone(), config, sender_events_tx);
    sender.set_single_file_source(src_dir.path().join("resilient.txt"));

    let mut r1 = admit_receiver(&sender, &manifest, "peer-1").await;
    let r2 = admit_receiver(&sender, &manifest, "peer-2").await;

    sender.mark_peer_ready(&r1.peer_id).await;
    sender.mark_peer_ready(&r2.peer_id).await;
    Arc::clone(&sender).try_start_batch().await.unwrap();

    // peer-2 drops before exchanging any frames; peer-1 must still be able
    // to drive its transfer to completion uninterrupted.
    sender.handle_disconnect(&r2.peer_id).await;

    drive_to_completion(&sender, &r1.receiver, &r1.peer_id, &mut r1.link_b).await.unwrap();
    assert_eq!(r1.receiver.finish(&r1.peer_id).await.unwrap(), 11);
    assert_eq!(std::fs::read(r1.dst_dir.path().join("resilient.txt")).unwrap(), b"still going");

    let mut saw_disconnected = false;
    while let Ok(event) = sender_events_rx.try_recv() {
        if matches!(event, SessionEvent::PeerDisconnected { .. }) {
            saw_disconnected = true;
        }
    }
    assert!(saw_disconnected);
}
