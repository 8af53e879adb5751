//! The session manager's aggregated error type.
//!
//! Mirrors the teacher's top-level `Error` in how it folds every lower
//! layer's error type into one enum via `#[from]`, so callers at the
//! session boundary only need to match on one type.

use meshdrop_core::{CryptoError, ErrorCategory, FrameError};
use meshdrop_files::WriterError;
use meshdrop_signaling::SignalingError;
use meshdrop_swarm::SchedulerError;
use meshdrop_zip::PackagingError;
use thiserror::Error;

/// Errors surfaced by the session/swarm manager.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Wire framing failed.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// AEAD sealing/opening failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// ZIP64 packaging failed.
    #[error(transparent)]
    Packaging(#[from] PackagingError),

    /// Writing received bytes to disk failed.
    #[error(transparent)]
    Writer(#[from] WriterError),

    /// The piece scheduler rejected an operation.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// The signaling channel failed.
    #[error(transparent)]
    Signaling(#[from] SignalingError),

    /// A chunk producer's underlying file read failed.
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A manifest received from a peer did not match the one this session
    /// was started with.
    #[error("manifest mismatch")]
    ManifestMismatch,

    /// The room has reached its transferring-peer capacity.
    #[error("room is full")]
    RoomFull,

    /// Referenced a room id this manager does not recognize.
    #[error("room not found: {0}")]
    RoomNotFound(String),

    /// A producer or peer failure aborted the active batch.
    #[error("transfer aborted: {0}")]
    TransferAborted(String),

    /// The session already reported completion; no further operations are
    /// valid.
    #[error("session already complete")]
    AlreadyComplete,

    /// An operation was attempted on a peer this manager does not track.
    #[error("unknown peer: {0}")]
    UnknownPeer(String),
}

impl SessionError {
    /// Classifies this error for retry/escalation purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Frame(e) => e.category(),
            Self::Crypto(e) => e.category(),
            Self::Signaling(e) => e.category(),
            Self::Packaging(_) => ErrorCategory::Resource,
            Self::Writer(WriterError::Io(_)) => ErrorCategory::Resource,
            Self::Writer(_) => ErrorCategory::Resource,
            Self::Scheduler(_) => ErrorCategory::Logical,
            Self::Io(_) => ErrorCategory::Resource,
            Self::ManifestMismatch => ErrorCategory::Protocol,
            Self::RoomFull | Self::RoomNotFound(_) | Self::AlreadyComplete | Self::UnknownPeer(_) => {
                ErrorCategory::Logical
            }
            Self::TransferAborted(_) => ErrorCategory::Fatal,
        }
    }
}
