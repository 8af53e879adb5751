//! Rarest-first piece scheduler with bootstrap and endgame modes.
//!
//! Degenerates to "request everything from the one sender in order" when
//! there is exactly one peer: with one bitfield to draw from, rarest-first
//! tie-breaking never has more than one candidate peer anyway.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::bitfield::Bitfield;
use crate::error::SchedulerError;
use crate::peer::{PeerId, PeerLinkState, PeerRecord};

/// Number of pieces completed before leaving the bootstrap (random-first)
/// phase, per spec §4.4.
pub const BOOTSTRAP_PIECE_COUNT: u32 = 4;
/// Completion fraction at which the scheduler switches to endgame mode.
pub const ENDGAME_THRESHOLD: f64 = 0.95;
/// Default bound on simultaneous requests outstanding to one peer.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 8;

/// Global scheduling phase, per spec §4.4's state machine:
/// `bootstrapping → rarest-first → endgame → complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalMode {
    /// Fewer than [`BOOTSTRAP_PIECE_COUNT`] pieces completed: pick randomly
    /// to avoid every peer converging on piece 0.
    Bootstrapping,
    /// Main phase: always request the rarest piece available.
    RarestFirst,
    /// Completion fraction at or above [`ENDGAME_THRESHOLD`]: duplicate the
    /// remaining requests across every capable peer.
    Endgame,
    /// Every piece has arrived and verified.
    Complete,
}

/// Rarest-first/endgame scheduler for one receive-side session.
pub struct PieceScheduler {
    total_pieces: u32,
    our_bitfield: Bitfield,
    peers: HashMap<PeerId, PeerRecord>,
    /// piece index -> set of peers it is currently requested from.
    pending: HashMap<u32, HashSet<PeerId>>,
    max_pending_requests: usize,
}

impl PieceScheduler {
    /// Creates a scheduler for a manifest with `total_pieces` pieces, none
    /// of which we yet own.
    #[must_use]
    pub fn new(total_pieces: u32, max_pending_requests: usize) -> Self {
        Self {
            total_pieces,
            our_bitfield: Bitfield::new(total_pieces),
            peers: HashMap::new(),
            pending: HashMap::new(),
            max_pending_requests,
        }
    }

    /// Registers a newly connected peer with an empty bitfield.
    pub fn add_peer(&mut self, peer_id: PeerId) {
        self.peers
            .entry(peer_id)
            .or_insert_with(|| PeerRecord::new(self.total_pieces));
    }

    /// Removes a disconnected peer, returning the piece indices that were
    /// in flight to it so the caller can see them become requestable again
    /// (spec §4.4: "all its in-flight requests are re-queued").
    pub fn remove_peer(&mut self, peer_id: &str) -> Vec<u32> {
        let Some(record) = self.peers.remove(peer_id) else {
            return Vec::new();
        };
        let mut requeued: Vec<u32> = record.in_flight.into_iter().collect();
        for piece in &requeued {
            if let Some(holders) = self.pending.get_mut(piece) {
                holders.remove(peer_id);
                if holders.is_empty() {
                    self.pending.remove(piece);
                }
            }
        }
        requeued.sort_unstable();
        requeued
    }

    /// Replaces a peer's whole advertised bitfield (the initial announce).
    ///
    /// # Errors
    ///
    /// Returns an error if `peer_id` is not a registered peer.
    pub fn set_peer_bitfield(&mut self, peer_id: &str, bitfield: Bitfield) -> Result<(), SchedulerError> {
        let record = self
            .peers
            .get_mut(peer_id)
            .ok_or_else(|| SchedulerError::UnknownPeer(peer_id.to_string()))?;
        record.bitfield = bitfield;
        Ok(())
    }

    /// Records a single incremental "have" announcement from a peer.
    ///
    /// # Errors
    ///
    /// Returns an error if `peer_id` is unknown or `piece_index` is out of range.
    pub fn peer_announced_piece(&mut self, peer_id: &str, piece_index: u32) -> Result<(), SchedulerError> {
        self.check_piece_index(piece_index)?;
        let record = self
            .peers
            .get_mut(peer_id)
            .ok_or_else(|| SchedulerError::UnknownPeer(peer_id.to_string()))?;
        record.bitfield.set(piece_index);
        Ok(())
    }

    /// Marks that we are interested in a peer's pieces.
    ///
    /// # Errors
    ///
    /// Returns an error if `peer_id` is unknown.
    pub fn mark_interested(&mut self, peer_id: &str) -> Result<(), SchedulerError> {
        let record = self.peer_mut(peer_id)?;
        if record.link_state == PeerLinkState::Connected {
            record.link_state = PeerLinkState::Interested;
        }
        Ok(())
    }

    /// Records that a peer has unchoked us, making it eligible for requests.
    ///
    /// # Errors
    ///
    /// Returns an error if `peer_id` is unknown.
    pub fn mark_unchoked(&mut self, peer_id: &str) -> Result<(), SchedulerError> {
        let record = self.peer_mut(peer_id)?;
        if matches!(record.link_state, PeerLinkState::Interested | PeerLinkState::Choked) {
            record.link_state = PeerLinkState::Unchoked;
        }
        Ok(())
    }

    /// Records that a peer has choked us; existing in-flight requests to it
    /// are left outstanding but no new ones may be issued until unchoked.
    ///
    /// # Errors
    ///
    /// Returns an error if `peer_id` is unknown.
    pub fn mark_choked(&mut self, peer_id: &str) -> Result<(), SchedulerError> {
        let record = self.peer_mut(peer_id)?;
        record.link_state = PeerLinkState::Choked;
        Ok(())
    }

    /// The scheduler's current global phase.
    #[must_use]
    pub fn global_mode(&self) -> GlobalMode {
        let completed = self.our_bitfield.count_set();
        if completed == self.total_pieces {
            GlobalMode::Complete
        } else if completed < BOOTSTRAP_PIECE_COUNT {
            GlobalMode::Bootstrapping
        } else if self.our_bitfield.completion_fraction() < ENDGAME_THRESHOLD {
            GlobalMode::RarestFirst
        } else {
            GlobalMode::Endgame
        }
    }

    /// Whether every piece has been received and verified.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.our_bitfield.is_complete()
    }

    /// Fraction of pieces received and verified so far.
    #[must_use]
    pub fn progress_fraction(&self) -> f64 {
        self.our_bitfield.completion_fraction()
    }

    fn rarity(&self, piece: u32) -> usize {
        self.peers.values().filter(|p| p.bitfield.has(piece)).count()
    }

    fn candidates_for(&self, peer_id: &str, mode: GlobalMode) -> Vec<u32> {
        let Some(peer) = self.peers.get(peer_id) else {
            return Vec::new();
        };
        (0..self.total_pieces)
            .filter(|&piece| peer.bitfield.has(piece) && !self.our_bitfield.has(piece))
            .filter(|&piece| match mode {
                GlobalMode::Endgame => !peer.in_flight.contains(&piece),
                _ => !self.pending.contains_key(&piece),
            })
            .collect()
    }

    /// Picks the next piece to request from `peer_id`, if any, applying the
    /// current global mode's policy and recording the assignment.
    ///
    /// Returns `Ok(None)` when the peer has no request capacity or no
    /// eligible piece to offer.
    ///
    /// # Errors
    ///
    /// Returns an error if `peer_id` is unknown.
    pub fn next_request(&mut self, peer_id: &str) -> Result<Option<u32>, SchedulerError> {
        let mode = self.global_mode();
        if mode == GlobalMode::Complete {
            return Ok(None);
        }
        {
            let record = self.peer_mut(peer_id)?;
            if !record.can_request(self.max_pending_requests) {
                return Ok(None);
            }
        }

        let candidates = self.candidates_for(peer_id, mode);
        if candidates.is_empty() {
            return Ok(None);
        }

        let chosen = match mode {
            GlobalMode::Bootstrapping | GlobalMode::Endgame => {
                *candidates.choose(&mut rand::thread_rng()).unwrap()
            }
            GlobalMode::RarestFirst => {
                let min_rarity = candidates.iter().map(|&p| self.rarity(p)).min().unwrap();
                let rarest: Vec<u32> = candidates
                    .into_iter()
                    .filter(|&p| self.rarity(p) == min_rarity)
                    .collect();
                *rarest.choose(&mut rand::thread_rng()).unwrap()
            }
            GlobalMode::Complete => unreachable!("handled above"),
        };

        self.pending.entry(chosen).or_default().insert(peer_id.to_string());
        let record = self.peer_mut(peer_id)?;
        record.in_flight.insert(chosen);
        if record.link_state == PeerLinkState::Unchoked {
            record.link_state = PeerLinkState::Requesting;
        }
        Ok(Some(chosen))
    }

    /// Fills every eligible peer's request pipeline up to its capacity,
    /// returning the `(peer, piece)` assignments made. The caller is
    /// expected to actually send the wire requests.
    pub fn fill_requests(&mut self) -> Vec<(PeerId, u32)> {
        let mut out = Vec::new();
        let peer_ids: Vec<PeerId> = self.peers.keys().cloned().collect();
        loop {
            let mut made_progress = false;
            for peer_id in &peer_ids {
                if let Ok(Some(piece)) = self.next_request(peer_id) {
                    out.push((peer_id.clone(), piece));
                    made_progress = true;
                }
            }
            if !made_progress {
                break;
            }
        }
        out
    }

    /// Marks `piece_index` complete and verified, having arrived from
    /// `from_peer`. Returns the set of other peers whose duplicate endgame
    /// request for this piece should now be cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if `piece_index` is out of range.
    pub fn complete_piece(&mut self, piece_index: u32, from_peer: &str, bytes: u64, elapsed: Duration) -> Result<Vec<PeerId>, SchedulerError> {
        self.check_piece_index(piece_index)?;
        self.our_bitfield.set(piece_index);

        let holders = self.pending.remove(&piece_index).unwrap_or_default();
        let mut cancel_others = Vec::new();
        for peer_id in &holders {
            if let Some(record) = self.peers.get_mut(peer_id) {
                record.in_flight.remove(&piece_index);
                if record.in_flight.is_empty() && record.link_state == PeerLinkState::Requesting {
                    record.link_state = PeerLinkState::Unchoked;
                }
            }
            if peer_id != from_peer {
                cancel_others.push(peer_id.clone());
            }
        }

        if let Some(record) = self.peers.get_mut(from_peer) {
            record.performance.record_success(bytes, elapsed);
        }

        Ok(cancel_others)
    }

    /// Discards a piece that failed hash verification, penalizing the peer
    /// it arrived from (spec §4.4: "its rank dropped one slot and the piece
    /// re-requested from a different peer"). The piece remains incomplete
    /// and will surface again from [`PieceScheduler::next_request`].
    ///
    /// # Errors
    ///
    /// Returns an error if `piece_index` is out of range.
    pub fn fail_piece_verification(&mut self, piece_index: u32, from_peer: &str) -> Result<(), SchedulerError> {
        self.check_piece_index(piece_index)?;
        if let Some(holders) = self.pending.remove(&piece_index) {
            for peer_id in holders {
                if let Some(record) = self.peers.get_mut(&peer_id) {
                    record.in_flight.remove(&piece_index);
                }
            }
        }
        if let Some(record) = self.peers.get_mut(from_peer) {
            record.performance.record_failure();
            record.rank_penalty += 1;
        }
        Ok(())
    }

    /// Read-only access to a peer's tracked state, for CLI progress display
    /// or tests.
    #[must_use]
    pub fn peer(&self, peer_id: &str) -> Option<&PeerRecord> {
        self.peers.get(peer_id)
    }

    fn peer_mut(&mut self, peer_id: &str) -> Result<&mut PeerRecord, SchedulerError> {
        self.peers
            .get_mut(peer_id)
            .ok_or_else(|| SchedulerError::UnknownPeer(peer_id.to_string()))
    }

    fn check_piece_index(&self, index: u32) -> Result<(), SchedulerError> {
        if index >= self.total_pieces {
            return Err(SchedulerError::PieceIndexOutOfRange {
                index,
                total: self.total_pieces,
            });
        }
        Ok(())
    }
}

/// Picks a uniformly random tie-break index from `0..n`. Extracted so
/// deterministic seeding is possible in tests that need reproducibility
/// beyond what `rand::thread_rng` offers.
#[must_use]
pub fn random_index(n: usize) -> usize {
    rand::thread_rng().gen_range(0..n)
}
