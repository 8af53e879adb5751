//! Errors from the piece scheduler.

use thiserror::Error;

/// Errors raised by [`crate::PieceScheduler`] operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Operation referenced a peer not currently tracked by the scheduler.
    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    /// Operation referenced a piece index outside `[0, totalPieces)`.
    #[error("piece index {index} out of range (total pieces: {total})")]
    PieceIndexOutOfRange {
        /// The offending index.
        index: u32,
        /// The scheduler's total piece count.
        total: u32,
    },
}
