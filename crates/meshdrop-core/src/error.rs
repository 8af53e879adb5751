//! Error taxonomy for the wire codec and congestion controller.
//!
//! Follows the five error categories shared across the workspace:
//! Connectivity, Protocol, Resource, Logical, Fatal. Each variant exposes a
//! human-readable [`ErrorCategory::remediation_hint`].

use thiserror::Error;

/// Top-level error category, used to decide retry/escalation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient network-level failure; retry is usually appropriate.
    Connectivity,
    /// Wire-format or cryptographic violation; never retried blindly.
    Protocol,
    /// Local resource exhaustion (memory, descriptors, disk).
    Resource,
    /// Caller misuse or invariant violation in this process.
    Logical,
    /// Unrecoverable condition; the session must be torn down.
    Fatal,
}

impl ErrorCategory {
    /// A short, human-readable remediation hint for this category.
    #[must_use]
    pub fn remediation_hint(self) -> &'static str {
        match self {
            Self::Connectivity => "retry the operation; the peer or transport may recover",
            Self::Protocol => "do not retry as-is; the peer sent data this codec rejects",
            Self::Resource => "free local resources (memory, file handles) before retrying",
            Self::Logical => "fix the calling code; this indicates a programming error",
            Self::Fatal => "abort the session; this condition cannot be recovered in-place",
        }
    }
}

/// Errors from frame header parsing and integrity checks.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Frame too short to contain a header or tag.
    #[error("frame too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Expected minimum size.
        expected: usize,
        /// Actual size received.
        actual: usize,
    },

    /// Decrypted payload length did not match the header's `payloadLen`.
    #[error("payload length mismatch: header said {expected}, got {actual}")]
    PayloadLengthMismatch {
        /// Length declared in the header.
        expected: usize,
        /// Length actually decrypted.
        actual: usize,
    },

    /// CRC-32 of the decrypted payload did not match the header.
    #[error("CRC-32 checksum mismatch")]
    ChecksumMismatch,
}

impl FrameError {
    /// Classifies this error for retry/escalation purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::TooShort { .. } => ErrorCategory::Protocol,
            Self::PayloadLengthMismatch { .. } => ErrorCategory::Protocol,
            Self::ChecksumMismatch => ErrorCategory::Protocol,
        }
    }
}

/// Errors from AEAD sealing, opening, and nonce management.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Underlying frame was malformed before decryption could proceed.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// AEAD seal operation failed (should not happen with a valid key).
    #[error("AEAD seal operation failed")]
    SealFailed,

    /// AEAD authentication tag did not verify.
    #[error("AEAD authentication failed")]
    AuthenticationFailure,

    /// Nonce counter was replayed outside the acceptance window.
    #[error("nonce counter replayed")]
    NonceReplay,

    /// Send-side nonce counter would wrap; the session must be closed.
    #[error("nonce counter overflow")]
    CounterOverflow,
}

impl CryptoError {
    /// Classifies this error for retry/escalation purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Frame(inner) => inner.category(),
            Self::SealFailed => ErrorCategory::Fatal,
            Self::AuthenticationFailure | Self::NonceReplay => ErrorCategory::Protocol,
            Self::CounterOverflow => ErrorCategory::Fatal,
        }
    }

    /// True if this error must never be retried and instead escalates to
    /// disconnecting the peer and aborting the session, per the protocol's
    /// error-propagation policy.
    #[must_use]
    pub fn is_never_retried(&self) -> bool {
        matches!(self, Self::AuthenticationFailure | Self::NonceReplay)
    }
}
