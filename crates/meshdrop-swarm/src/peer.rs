//! Per-peer scheduling state: link lifecycle, bitfield, and EMA performance.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::bitfield::Bitfield;

/// Opaque peer identifier, matching the data model's "opaque" `peerId`.
pub type PeerId = String;

/// Per-peer link state, per spec §4.4's state machine:
/// `connected → interested → unchoked → requesting ⇄ choked` and
/// `→ disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerLinkState {
    /// Transport-connected, no interest expressed yet.
    Connected,
    /// We are interested in pieces this peer has.
    Interested,
    /// The peer is not choking us; we may send requests.
    Unchoked,
    /// At least one request to this peer is currently in flight.
    Requesting,
    /// The peer is choking us; any in-flight requests are still honored but
    /// no new ones may be issued.
    Choked,
    /// The peer disconnected; all its in-flight requests have been
    /// re-queued.
    Disconnected,
}

/// EMA-smoothed throughput/RTT/reliability tracking per peer, grounded on
/// the teacher's `PeerPerformance` (round-trip EMA, success/failure counts,
/// a reliability-based penalty on failure).
#[derive(Debug, Clone)]
pub struct PeerPerformance {
    rtt_us: u64,
    throughput_bps: u64,
    chunks_succeeded: u64,
    chunks_failed: u64,
    last_active: Instant,
}

impl PeerPerformance {
    fn new() -> Self {
        Self {
            rtt_us: 100_000,
            throughput_bps: 1_000_000,
            chunks_succeeded: 0,
            chunks_failed: 0,
            last_active: Instant::now(),
        }
    }

    /// Records one successful piece download of `bytes` over `duration`.
    pub fn record_success(&mut self, bytes: u64, duration: Duration) {
        self.chunks_succeeded += 1;
        self.last_active = Instant::now();
        if duration.as_secs_f64() > 0.0 {
            let bps = (bytes as f64 / duration.as_secs_f64()) as u64;
            let alpha = 0.25;
            self.throughput_bps = ((1.0 - alpha) * self.throughput_bps as f64 + alpha * bps as f64) as u64;
        }
    }

    /// Records one failed (mismatched/timed-out) piece download.
    pub fn record_failure(&mut self) {
        self.chunks_failed += 1;
        self.last_active = Instant::now();
    }

    /// Updates the RTT exponential moving average with a fresh sample.
    pub fn update_rtt(&mut self, rtt: Duration) {
        let alpha = 0.125;
        let rtt_us = rtt.as_micros() as u64;
        self.rtt_us = ((1.0 - alpha) * self.rtt_us as f64 + alpha * rtt_us as f64) as u64;
    }

    /// Mean RTT estimate, in microseconds.
    #[must_use]
    pub fn rtt_us(&self) -> u64 {
        self.rtt_us
    }

    /// EMA throughput estimate, in bytes per second.
    #[must_use]
    pub fn throughput_bps(&self) -> u64 {
        self.throughput_bps
    }

    /// Fraction of completed piece downloads that failed verification.
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let total = self.chunks_succeeded + self.chunks_failed;
        if total == 0 {
            0.0
        } else {
            self.chunks_failed as f64 / total as f64
        }
    }
}

impl Default for PeerPerformance {
    fn default() -> Self {
        Self::new()
    }
}

/// All scheduling state the scheduler keeps about one connected peer.
pub struct PeerRecord {
    pub(crate) bitfield: Bitfield,
    pub(crate) link_state: PeerLinkState,
    pub(crate) in_flight: HashSet<u32>,
    pub(crate) performance: PeerPerformance,
    /// Rarity-tiebreak/penalty rank; lower is preferred. Bumped up by one
    /// (i.e. made less preferred) on a failed piece verification.
    pub(crate) rank_penalty: u32,
}

impl PeerRecord {
    pub(crate) fn new(total_pieces: u32) -> Self {
        Self {
            bitfield: Bitfield::new(total_pieces),
            link_state: PeerLinkState::Connected,
            in_flight: HashSet::new(),
            performance: PeerPerformance::new(),
            rank_penalty: 0,
        }
    }

    /// The peer's advertised bitfield.
    #[must_use]
    pub fn bitfield(&self) -> &Bitfield {
        &self.bitfield
    }

    /// The peer's current link state.
    #[must_use]
    pub fn link_state(&self) -> PeerLinkState {
        self.link_state
    }

    /// Performance metrics tracked for this peer.
    #[must_use]
    pub fn performance(&self) -> &PeerPerformance {
        &self.performance
    }

    /// Whether we may currently issue this peer a new request: it must be
    /// unchoking us and have spare in-flight capacity.
    #[must_use]
    pub fn can_request(&self, max_pending: usize) -> bool {
        matches!(self.link_state, PeerLinkState::Unchoked | PeerLinkState::Requesting)
            && self.in_flight.len() < max_pending
    }
}
