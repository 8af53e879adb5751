//! Session-wide tunables, with the defaults from the configuration table.

use serde::{Deserialize, Serialize};

const fn default_max_direct_peers() -> u32 {
    4
}
const fn default_piece_size() -> u32 {
    1024 * 1024
}
const fn default_max_pending_requests() -> usize {
    8
}
const fn default_chunk_size_min() -> u32 {
    16 * 1024
}
const fn default_chunk_size_max() -> u32 {
    4 * 1024 * 1024
}
const fn default_cwnd_initial() -> u64 {
    1024 * 1024
}
const fn default_cwnd_min() -> u64 {
    256 * 1024
}
const fn default_cwnd_max() -> u64 {
    16 * 1024 * 1024
}
const fn default_high_water_mark() -> u64 {
    12 * 1024 * 1024
}
const fn default_low_water_mark() -> u64 {
    4 * 1024 * 1024
}
const fn default_max_buffered_amount() -> u64 {
    16 * 1024 * 1024
}
const fn default_connect_timeout_ms() -> u64 {
    15_000
}
const fn default_idle_timeout_ms() -> u64 {
    30_000
}
const fn default_all_ready_countdown_ms() -> u64 {
    5_000
}

/// Session-wide configuration, deserializable from TOML. Every field has a
/// default matching spec's configuration table, so an empty document is a
/// valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum concurrently `transferring` peers per room.
    pub max_direct_peers: u32,
    /// Logical piece size, in bytes.
    pub piece_size: u32,
    /// Maximum simultaneous in-flight requests per peer.
    pub max_pending_requests: usize,
    /// Minimum transport chunk size, in bytes.
    pub chunk_size_min: u32,
    /// Maximum transport chunk size, in bytes.
    pub chunk_size_max: u32,
    /// Initial congestion window, in bytes.
    pub cwnd_initial: u64,
    /// Minimum congestion window, in bytes.
    pub cwnd_min: u64,
    /// Maximum congestion window, in bytes.
    pub cwnd_max: u64,
    /// Buffered-bytes threshold above which the controller signals `paused`.
    pub high_water_mark: u64,
    /// Buffered-bytes threshold below which the controller signals `resumed`.
    pub low_water_mark: u64,
    /// Hard cap on a peer's buffered send queue before backpressure applies.
    pub max_buffered_amount: u64,
    /// Signaling connect deadline, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Idle-in-flight-with-no-ack deadline before a retransmit request, in
    /// milliseconds.
    pub idle_timeout_ms: u64,
    /// Duration of the "all-ready" batch-start countdown, in milliseconds.
    pub all_ready_countdown_ms: u64,
    /// Session encryption settings; `None` means payloads travel in the
    /// clear (still framed and CRC-32-checked, just not AEAD-sealed).
    pub encryption: Option<EncryptionConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_direct_peers: default_max_direct_peers(),
            piece_size: default_piece_size(),
            max_pending_requests: default_max_pending_requests(),
            chunk_size_min: default_chunk_size_min(),
            chunk_size_max: default_chunk_size_max(),
            cwnd_initial: default_cwnd_initial(),
            cwnd_min: default_cwnd_min(),
            cwnd_max: default_cwnd_max(),
            high_water_mark: default_high_water_mark(),
            low_water_mark: default_low_water_mark(),
            max_buffered_amount: default_max_buffered_amount(),
            connect_timeout_ms: default_connect_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            all_ready_countdown_ms: default_all_ready_countdown_ms(),
            encryption: None,
        }
    }
}

/// A 32-byte AES-256 session key plus the 4-byte nonce prefix, both
/// established out-of-band (spec.md's "per-session shared secret").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// 32-byte AES-256 key, hex-encoded.
    pub key_hex: String,
    /// 4-byte nonce prefix, hex-encoded.
    pub prefix_hex: String,
}

impl EncryptionConfig {
    /// Decodes the hex-encoded key and prefix into their raw byte forms.
    ///
    /// # Errors
    ///
    /// Returns an error if either field is not valid hex, or not the
    /// expected length (32 bytes for the key, 4 for the prefix).
    pub fn decode(&self) -> Result<([u8; 32], [u8; 4]), hex::FromHexError> {
        let key_bytes = hex::decode(&self.key_hex)?;
        let prefix_bytes = hex::decode(&self.prefix_hex)?;
        let mut key = [0u8; 32];
        let mut prefix = [0u8; 4];
        if key_bytes.len() == 32 {
            key.copy_from_slice(&key_bytes);
        }
        if prefix_bytes.len() == 4 {
            prefix.copy_from_slice(&prefix_bytes);
        }
        Ok((key, prefix))
    }
}
