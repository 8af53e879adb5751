//! Wire packet framing and AEAD sealing.
//!
//! Every chunk on the wire is a 22-byte little-endian header followed by
//! the (possibly encrypted) payload:
//!
//! ```text
//! offset  size  field
//! 0       2     fileIndex      (u16)
//! 2       4     chunkSequence  (u32)
//! 6       8     absoluteOffset (u64)
//! 14      4     payloadLen     (u32)
//! 18      4     crc32          (u32, of the plaintext payload)
//! ```
//!
//! The header is sent as associated data: it is authenticated but not
//! encrypted, so receivers can route/dedupe frames without decrypting.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use std::collections::VecDeque;

use crate::pool;

use crate::error::{CryptoError, FrameError};

/// Size of the plaintext header, in bytes.
pub const HEADER_SIZE: usize = 22;
/// Size of the AES-256-GCM authentication tag, in bytes.
pub const TAG_SIZE: usize = 16;
/// Size of the per-session random nonce prefix, in bytes.
pub const NONCE_PREFIX_SIZE: usize = 4;
/// Size of the monotonic nonce counter, in bytes.
pub const NONCE_COUNTER_SIZE: usize = 8;
/// Number of trailing counters a peer will accept out of order.
pub const REPLAY_WINDOW_SIZE: u64 = 1024;

/// Plaintext header carried as AEAD associated data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Index into the manifest's file list.
    pub file_index: u16,
    /// Globally monotonic chunk sequence number.
    pub chunk_sequence: u32,
    /// Byte offset of this chunk within its file.
    pub absolute_offset: u64,
    /// Length of the plaintext payload, in bytes.
    pub payload_len: u32,
    /// CRC-32 (IEEE 802.3) of the plaintext payload.
    pub crc32: u32,
}

impl FrameHeader {
    /// Serializes the header to its 22-byte little-endian wire form.
    #[must_use]
    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..2].copy_from_slice(&self.file_index.to_le_bytes());
        out[2..6].copy_from_slice(&self.chunk_sequence.to_le_bytes());
        out[6..14].copy_from_slice(&self.absolute_offset.to_le_bytes());
        out[14..18].copy_from_slice(&self.payload_len.to_le_bytes());
        out[18..22].copy_from_slice(&self.crc32.to_le_bytes());
        out
    }

    /// Parses a 22-byte little-endian header.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            file_index: u16::from_le_bytes(bytes[0..2].try_into().unwrap()),
            chunk_sequence: u32::from_le_bytes(bytes[2..6].try_into().unwrap()),
            absolute_offset: u64::from_le_bytes(bytes[6..14].try_into().unwrap()),
            payload_len: u32::from_le_bytes(bytes[14..18].try_into().unwrap()),
            crc32: u32::from_le_bytes(bytes[18..22].try_into().unwrap()),
        })
    }
}

/// Computes the CRC-32 (IEEE 802.3, polynomial 0xEDB88320) of `data`.
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// AES-256-GCM sealer/opener bound to one peer direction.
///
/// The nonce is `prefix (4 random bytes, fixed for the session) ||
/// counter (8 bytes, incremented once per frame)`. A fresh [`FrameCodec`]
/// must be constructed per direction per session: reusing a
/// `(key, prefix)` pair across sessions would allow nonce reuse.
pub struct FrameCodec {
    cipher: Aes256Gcm,
    prefix: [u8; NONCE_PREFIX_SIZE],
    send_counter: u64,
    replay_window: ReplayWindow,
}

impl FrameCodec {
    /// Builds a codec from a 32-byte session key and a random nonce prefix.
    #[must_use]
    pub fn new(key: &[u8; 32], prefix: [u8; NONCE_PREFIX_SIZE]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
            prefix,
            send_counter: 0,
            replay_window: ReplayWindow::new(),
        }
    }

    fn nonce_bytes(prefix: [u8; NONCE_PREFIX_SIZE], counter: u64) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[0..NONCE_PREFIX_SIZE].copy_from_slice(&prefix);
        nonce[NONCE_PREFIX_SIZE..].copy_from_slice(&counter.to_be_bytes());
        nonce
    }

    /// Encodes, seals, and returns one wire frame: `header || ciphertext || tag`.
    ///
    /// The ciphertext is sealed in place into a buffer drawn from the
    /// process-wide packet pool rather than a fresh heap allocation; the
    /// working buffer is returned to the pool once its bytes have been
    /// copied into the framed output.
    pub fn encode(
        &mut self,
        file_index: u16,
        chunk_sequence: u32,
        absolute_offset: u64,
        payload: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if self.send_counter == u64::MAX {
            return Err(CryptoError::CounterOverflow);
        }
        let header = FrameHeader {
            file_index,
            chunk_sequence,
            absolute_offset,
            payload_len: payload.len() as u32,
            crc32: crc32(payload),
        };
        let header_bytes = header.to_bytes();
        let nonce = Self::nonce_bytes(self.prefix, self.send_counter);
        self.send_counter += 1;

        let mut sealed = pool::acquire();
        sealed.extend_from_slice(payload);
        self.cipher
            .encrypt_in_place(Nonce::from_slice(&nonce), &header_bytes, &mut sealed)
            .map_err(|_| CryptoError::SealFailed)?;

        let mut out = pool::acquire();
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(&sealed);
        pool::release(sealed);
        Ok(out)
    }

    /// Verifies, decrypts, and returns `(header, plaintext)` for one wire frame.
    ///
    /// The peer's nonce counter is reconstructed as `remote_counter`; callers
    /// on a given logical channel must supply monotonically-discoverable
    /// counters (typically the frame's own `chunk_sequence`, or a counter the
    /// transport layer tracks per peer).
    ///
    /// The returned plaintext buffer is drawn from the process-wide packet
    /// pool; callers that are done with it (typically right after writing it
    /// through to disk) should return it with [`pool::release`].
    pub fn decode(
        &mut self,
        remote_counter: u64,
        frame: &[u8],
    ) -> Result<(FrameHeader, Vec<u8>), CryptoError> {
        if frame.len() < HEADER_SIZE + TAG_SIZE {
            return Err(CryptoError::Frame(FrameError::TooShort {
                expected: HEADER_SIZE + TAG_SIZE,
                actual: frame.len(),
            }));
        }
        if !self.replay_window.accept(remote_counter) {
            return Err(CryptoError::NonceReplay);
        }

        let header_bytes = &frame[0..HEADER_SIZE];
        let header = FrameHeader::from_bytes(header_bytes).map_err(CryptoError::Frame)?;
        let ciphertext = &frame[HEADER_SIZE..];
        let nonce = Self::nonce_bytes(self.prefix, remote_counter);

        let mut plaintext = pool::acquire();
        plaintext.extend_from_slice(ciphertext);
        self.cipher
            .decrypt_in_place(Nonce::from_slice(&nonce), header_bytes, &mut plaintext)
            .map_err(|_| CryptoError::AuthenticationFailure)?;

        if plaintext.len() != header.payload_len as usize {
            return Err(CryptoError::Frame(FrameError::PayloadLengthMismatch {
                expected: header.payload_len as usize,
                actual: plaintext.len(),
            }));
        }
        if crc32(&plaintext) != header.crc32 {
            return Err(CryptoError::Frame(FrameError::ChecksumMismatch));
        }

        Ok((header, plaintext))
    }
}

/// Sliding window of the last [`REPLAY_WINDOW_SIZE`] accepted nonce counters.
///
/// Counters strictly greater than the highest seen are always accepted and
/// slide the window forward; counters within the window are accepted once;
/// counters below the window, or already marked seen, are rejected as replays.
struct ReplayWindow {
    highest: Option<u64>,
    seen: VecDeque<u64>,
}

impl ReplayWindow {
    fn new() -> Self {
        Self {
            highest: None,
            seen: VecDeque::with_capacity(REPLAY_WINDOW_SIZE as usize),
        }
    }

    fn accept(&mut self, counter: u64) -> bool {
        let highest = match self.highest {
            None => {
                self.highest = Some(counter);
                self.remember(counter);
                return true;
            }
            Some(h) => h,
        };

        if counter > highest {
            self.highest = Some(counter);
            self.remember(counter);
            return true;
        }

        if highest - counter >= REPLAY_WINDOW_SIZE {
            return false;
        }
        if self.seen.contains(&counter) {
            return false;
        }
        self.remember(counter);
        true
    }

    fn remember(&mut self, counter: u64) {
        if self.seen.len() as u64 >= REPLAY_WINDOW_SIZE {
            self.seen.pop_front();
        }
        self.seen.push_back(counter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec_pair() -> (FrameCodec, FrameCodec) {
        let key = [7u8; 32];
        let prefix = [1, 2, 3, 4];
        (FrameCodec::new(&key, prefix), FrameCodec::new(&key, prefix))
    }

    #[test]
    fn round_trips_header_and_payload() {
        let (mut sender, mut receiver) = codec_pair();
        let payload = b"some chunk bytes".to_vec();
        let frame = sender.encode(3, 42, 128, &payload).unwrap();
        let (header, plaintext) = receiver.decode(0, &frame).unwrap();
        assert_eq!(header.file_index, 3);
        assert_eq!(header.chunk_sequence, 42);
        assert_eq!(header.absolute_offset, 128);
        assert_eq!(header.payload_len, payload.len() as u32);
        assert_eq!(plaintext, payload);
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let (mut sender, mut receiver) = codec_pair();
        let mut frame = sender.encode(0, 0, 0, b"hello").unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(matches!(
            receiver.decode(0, &frame),
            Err(CryptoError::AuthenticationFailure)
        ));
    }

    #[test]
    fn replayed_counter_is_rejected() {
        let (mut sender, mut receiver) = codec_pair();
        let frame = sender.encode(0, 0, 0, b"hello").unwrap();
        receiver.decode(0, &frame).unwrap();
        assert!(matches!(
            receiver.decode(0, &frame),
            Err(CryptoError::NonceReplay)
        ));
    }

    #[test]
    fn counter_overflow_is_fatal() {
        let (mut sender, _receiver) = codec_pair();
        sender.send_counter = u64::MAX;
        assert!(matches!(
            sender.encode(0, 0, 0, b"x"),
            Err(CryptoError::CounterOverflow)
        ));
    }

    proptest::proptest! {
        #[test]
        fn header_round_trips_for_any_fields(
            file_index: u16,
            chunk_sequence: u32,
            absolute_offset: u64,
            payload_len: u32,
            crc32: u32,
        ) {
            let header = FrameHeader { file_index, chunk_sequence, absolute_offset, payload_len, crc32 };
            let bytes = header.to_bytes();
            let parsed = FrameHeader::from_bytes(&bytes).unwrap();
            proptest::prop_assert_eq!(header, parsed);
        }
    }
}
