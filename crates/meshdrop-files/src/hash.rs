//! Optional per-piece SHA-256 verification.
//!
//! The manifest may supply a SHA-256 digest per file; when it does, a
//! completed piece is verified against it. When it doesn't, integrity
//! relies solely on per-chunk CRC-32 and AEAD authentication.

use sha2::{Digest, Sha256};

/// Computes the SHA-256 digest of `data`.
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Verifies `data` against an `expected` digest, if one was supplied.
///
/// Returns `true` when no digest was supplied (nothing to verify) or when
/// the computed digest matches.
#[must_use]
pub fn verify(data: &[u8], expected: Option<&[u8; 32]>) -> bool {
    match expected {
        Some(expected) => sha256(data) == *expected,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_passes_without_expected_digest() {
        assert!(verify(b"anything", None));
    }

    #[test]
    fn verify_detects_mismatch() {
        let digest = sha256(b"hello");
        assert!(verify(b"hello", Some(&digest)));
        assert!(!verify(b"goodbye", Some(&digest)));
    }
}
