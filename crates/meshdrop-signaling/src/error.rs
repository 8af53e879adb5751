//! Errors from signaling connection and message exchange.

use meshdrop_core::ErrorCategory;
use thiserror::Error;

/// Errors raised while connecting to or exchanging messages over a
/// signaling channel.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// The signaling server could not be reached at all.
    #[error("signaling channel unavailable: {0}")]
    Unavailable(String),

    /// The underlying connection was lost mid-session.
    #[error("signaling connection lost: {0}")]
    ConnectionLost(String),

    /// A connect or receive operation exceeded its deadline.
    #[error("signaling operation timed out")]
    Timeout,

    /// A received frame was not valid UTF-8/JSON, or did not match any
    /// recognized message tag.
    #[error("malformed signaling frame: {0}")]
    MalformedFrame(String),

    /// A message arrived that made no sense in the current protocol state
    /// (e.g. an `Offer` before `RoomJoined`).
    #[error("unexpected signaling message: {0}")]
    UnexpectedMessage(String),
}

impl SignalingError {
    /// Classifies this error for retry/escalation purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Unavailable(_) | Self::ConnectionLost(_) | Self::Timeout => ErrorCategory::Connectivity,
            Self::MalformedFrame(_) | Self::UnexpectedMessage(_) => ErrorCategory::Protocol,
        }
    }
}
