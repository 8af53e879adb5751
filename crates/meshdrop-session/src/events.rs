//! Outbound events the session manager reports to its driver.
//!
//! Per Design Notes §9's collapse of the source's many ad hoc callbacks
//! into "(i) a typed channel of outbound events, (ii) synchronous return
//! values for request/response operations", every asynchronous, driver-
//! facing notification flows through one [`SessionEvent`] channel.

use meshdrop_signaling::PeerId;

/// One notification emitted by a [`crate::manager::SwarmManager`] to its
/// driver (typically a CLI or UI layer).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A peer joined the room and received the manifest.
    PeerJoined {
        /// The newly joined peer.
        peer_id: PeerId,
    },
    /// A peer's lifecycle state changed.
    PeerStateChanged {
        /// The peer whose state changed.
        peer_id: PeerId,
        /// Human-readable description of the new state.
        state: String,
    },
    /// Progress update for one peer's transfer.
    Progress {
        /// The peer this progress reading concerns.
        peer_id: PeerId,
        /// Bytes transferred so far.
        bytes_transferred: u64,
        /// Total expected bytes. Best-effort: per §9 Open Question 1, a
        /// `isSizeEstimated` manifest means this may be revised upward as
        /// packaging reveals the true size.
        total_bytes: u64,
    },
    /// A peer finished receiving and verifying the full payload.
    PeerComplete {
        /// The peer that completed.
        peer_id: PeerId,
        /// The peer's self-reported received byte count, per §9 Open
        /// Question 3's `{ peer_id, actual_bytes }` acknowledgement shape.
        actual_bytes: u64,
    },
    /// A peer disconnected mid-transfer.
    PeerDisconnected {
        /// The peer that disconnected.
        peer_id: PeerId,
    },
    /// The current batch was aborted due to an unrecoverable error.
    TransferAborted {
        /// Human-readable reason.
        reason: String,
    },
    /// The room's batch queue is empty and no further arrivals are
    /// expected; the room is now idle.
    RoomReadyForNext,
    /// The room was closed.
    RoomClosed,
}
