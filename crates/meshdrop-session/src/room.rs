//! Room and per-peer lifecycle state.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use meshdrop_signaling::PeerId;

use crate::manifest::Manifest;

/// Generates a 6-character alphanumeric room id.
#[must_use]
pub fn generate_room_id() -> String {
    use rand::Rng;
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..6).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char).collect()
}

/// A room's lifecycle state, per spec §3's `created → open → transferring →
/// ready-for-next → closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// Admitting peers; no batch is running yet.
    Open,
    /// A batch of peers is actively receiving the manifest's payload.
    Transferring,
    /// The current batch finished and the queue is empty; awaiting new
    /// arrivals or an explicit close.
    ReadyForNext,
    /// The room has been torn down.
    Closed,
}

/// Whether a peer is the manifest's owner or a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Owns the manifest and drives the chunk producer.
    Sender,
    /// Receives the manifest's payload.
    Receiver,
}

/// A peer's lifecycle state within a room, per spec §3's
/// `joining → ready → (transferring | queued) → complete | disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRoomState {
    /// Admitted to the room, manifest not yet delivered.
    Joining,
    /// Manifest delivered; waiting for the next batch to start.
    Ready,
    /// In the active batch, receiving bytes.
    Transferring,
    /// Admitted but past `MAX_DIRECT_PEERS`; waiting for a batch slot.
    Queued,
    /// Finished receiving and verifying the manifest's payload.
    Complete,
    /// Lost its connection; may still rejoin the queue.
    Disconnected,
}

/// One peer tracked by a [`Room`].
#[derive(Debug, Clone)]
pub struct PeerInRoom {
    /// Opaque id assigned at signaling admission.
    pub peer_id: PeerId,
    /// Sender or receiver.
    pub role: PeerRole,
    /// Current lifecycle state.
    pub state: PeerRoomState,
    /// Most recently observed round-trip time.
    pub observed_rtt: Duration,
    /// Bytes received so far in the current (or most recent) batch.
    pub bytes_transferred: u64,
}

impl PeerInRoom {
    fn new(peer_id: PeerId, role: PeerRole) -> Self {
        Self {
            peer_id,
            role,
            state: PeerRoomState::Joining,
            observed_rtt: Duration::ZERO,
            bytes_transferred: 0,
        }
    }
}

/// A room: one sender's manifest, the peers admitted to receive it, and the
/// admission/batching state machine described in spec §4.6.
pub struct Room {
    /// Short, shareable room identifier.
    pub id: String,
    /// The immutable manifest this room was created to transfer.
    pub manifest: Manifest,
    /// Maximum concurrently `Transferring` peers.
    pub max_direct_peers: u32,
    /// Current lifecycle state.
    pub state: RoomState,
    peers: Vec<PeerInRoom>,
    queue: VecDeque<PeerId>,
    batch: HashSet<PeerId>,
}

impl Room {
    /// Creates a newly `Open` room for `manifest`.
    #[must_use]
    pub fn new(manifest: Manifest, max_direct_peers: u32) -> Self {
        Self {
            id: generate_room_id(),
            manifest,
            max_direct_peers,
            state: RoomState::Open,
            peers: Vec::new(),
            queue: VecDeque::new(),
            batch: HashSet::new(),
        }
    }

    /// Admits a newly joined peer. If the room is already transferring, or
    /// if `max_direct_peers` slots are already claimed by peers ahead of it
    /// (joining, ready, or transferring), the peer is placed in the queue
    /// instead (spec's "late arrivals are admitted to the queue, not the
    /// running batch" and "additional joiners enter `queued`").
    pub fn admit(&mut self, peer_id: PeerId, role: PeerRole) {
        let mut entry = PeerInRoom::new(peer_id.clone(), role);
        let claimed_slots = self
            .peers
            .iter()
            .filter(|p| {
                matches!(
                    p.state,
                    PeerRoomState::Joining | PeerRoomState::Ready | PeerRoomState::Transferring
                )
            })
            .count() as u32;
        if self.state == RoomState::Transferring || claimed_slots >= self.max_direct_peers {
            entry.state = PeerRoomState::Queued;
            self.queue.push_back(peer_id);
        }
        self.peers.push(entry);
    }

    /// Marks a peer `Ready` once it has received the manifest. No-op for
    /// peers already queued.
    pub fn mark_ready(&mut self, peer_id: &str) {
        if let Some(peer) = self.peer_mut(peer_id) {
            if peer.state == PeerRoomState::Joining {
                peer.state = PeerRoomState::Ready;
            }
        }
    }

    /// Whether at least one peer is `Ready` and eligible to start a batch.
    #[must_use]
    pub fn has_ready_peer(&self) -> bool {
        self.peers.iter().any(|p| p.state == PeerRoomState::Ready)
    }

    /// Whether the ready-peer count has reached `max_direct_peers`, which
    /// short-circuits the all-ready countdown.
    #[must_use]
    pub fn ready_batch_is_full(&self) -> bool {
        let ready_count = self.peers.iter().filter(|p| p.state == PeerRoomState::Ready).count() as u32;
        ready_count >= self.max_direct_peers
    }

    /// Promotes up to `max_direct_peers` `Ready` peers, in join order, into
    /// the active batch and transitions the room to `Transferring`. Any
    /// surplus `Ready` peers beyond the cap are pushed back onto the queue
    /// rather than promoted. Returns the promoted peer ids.
    pub fn start_batch(&mut self) -> Vec<PeerId> {
        let mut promoted = Vec::new();
        let mut surplus = Vec::new();
        for peer in &mut self.peers {
            if peer.state == PeerRoomState::Ready {
                if promoted.len() < self.max_direct_peers as usize {
                    peer.state = PeerRoomState::Transferring;
                    self.batch.insert(peer.peer_id.clone());
                    promoted.push(peer.peer_id.clone());
                } else {
                    surplus.push(peer.peer_id.clone());
                }
            }
        }
        for peer_id in surplus {
            if let Some(peer) = self.peer_mut(&peer_id) {
                peer.state = PeerRoomState::Queued;
            }
            self.queue.push_back(peer_id);
        }
        self.state = RoomState::Transferring;
        promoted
    }

    /// Records that `peer_id` finished receiving and verifying the batch's
    /// payload. Once every batched peer has completed, the batch ends:
    /// returns `true` if this call ended the batch.
    pub fn complete_peer(&mut self, peer_id: &str) -> bool {
        if let Some(peer) = self.peer_mut(peer_id) {
            peer.state = PeerRoomState::Complete;
        }
        self.batch.remove(peer_id);
        if self.batch.is_empty() {
            self.advance_after_batch();
            true
        } else {
            false
        }
    }

    /// Records that `peer_id` disconnected mid-batch. The remaining peers
    /// continue; this peer is dropped from the active batch and may
    /// rejoin the queue via [`Room::requeue_disconnected`].
    pub fn disconnect_peer(&mut self, peer_id: &str) {
        if let Some(peer) = self.peer_mut(peer_id) {
            peer.state = PeerRoomState::Disconnected;
        }
        self.batch.remove(peer_id);
    }

    /// Moves a previously disconnected peer back into the queue.
    pub fn requeue_disconnected(&mut self, peer_id: &str) {
        if let Some(peer) = self.peer_mut(peer_id) {
            if peer.state == PeerRoomState::Disconnected {
                peer.state = PeerRoomState::Queued;
                self.queue.push_back(peer_id.to_string());
            }
        }
    }

    /// If the queue is non-empty, pulls up to `max_direct_peers` queued
    /// peers (in join order) back to `Ready` so the next batch can start
    /// immediately, leaving any remainder queued; otherwise the room enters
    /// `ReadyForNext`. Returns the peer ids pulled from the queue.
    pub fn advance_after_batch(&mut self) -> Vec<PeerId> {
        if self.queue.is_empty() {
            self.state = RoomState::ReadyForNext;
            return Vec::new();
        }
        let mut pulled = Vec::new();
        while pulled.len() < self.max_direct_peers as usize {
            let Some(peer_id) = self.queue.pop_front() else {
                break;
            };
            if let Some(peer) = self.peer_mut(&peer_id) {
                peer.state = PeerRoomState::Ready;
            }
            pulled.push(peer_id);
        }
        self.state = RoomState::Open;
        pulled
    }

    /// Aborts the whole room: every tracked peer is treated as failed and
    /// the room is closed. Used on an unrecoverable producer error.
    pub fn abort(&mut self) {
        self.batch.clear();
        self.queue.clear();
        self.state = RoomState::Closed;
    }

    /// Closes the room, e.g. on an explicit sender-initiated close or an
    /// idle timeout.
    pub fn close(&mut self) {
        self.state = RoomState::Closed;
    }

    /// The peer ids currently in the active batch.
    #[must_use]
    pub fn batch_peers(&self) -> Vec<PeerId> {
        self.batch.iter().cloned().collect()
    }

    /// Read-only access to one tracked peer.
    #[must_use]
    pub fn peer(&self, peer_id: &str) -> Option<&PeerInRoom> {
        self.peers.iter().find(|p| p.peer_id == peer_id)
    }

    fn peer_mut(&mut self, peer_id: &str) -> Option<&mut PeerInRoom> {
        self.peers.iter_mut().find(|p| p.peer_id == peer_id)
    }
}
