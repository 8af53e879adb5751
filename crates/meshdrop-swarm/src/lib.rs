#![warn(missing_docs)]
#![warn(clippy::all)]

//! Rarest-first piece scheduling for multi-peer receive sessions.
//!
//! A [`PieceScheduler`] tracks which pieces we and our connected peers own,
//! decides which piece to request next from a given peer, and handles the
//! bootstrap/rarest-first/endgame policy transitions and peer disconnects
//! described in the scheduling spec. It does not itself speak any wire
//! protocol: callers drive it with bitfield/have announcements and feed back
//! completion or verification-failure events, and act on the `(peer, piece)`
//! assignments it produces.

mod bitfield;
mod error;
mod peer;
mod scheduler;

pub use bitfield::Bitfield;
pub use error::SchedulerError;
pub use peer::{PeerId, PeerLinkState, PeerPerformance, PeerRecord};
pub use scheduler::{
    GlobalMode, PieceScheduler, BOOTSTRAP_PIECE_COUNT, DEFAULT_MAX_PENDING_REQUESTS, ENDGAME_THRESHOLD,
};
