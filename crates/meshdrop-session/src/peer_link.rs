//! The opaque per-peer transport abstraction.
//!
//! Spec.md treats the actual transport as "the negotiated datagram/stream
//! connection" and never specifies it; this trait is the seam the session
//! manager drives without caring whether bytes travel over a QUIC stream,
//! a WebRTC data channel, or (in tests) an in-memory channel.

use async_trait::async_trait;

use crate::error::SessionError;

/// One peer's wire-level send/receive channel plus its current send-buffer
/// occupancy, which the congestion controller samples as `bufferedAmount`.
#[async_trait]
pub trait PeerLink: Send {
    /// Sends one fully-framed (and optionally sealed) wire frame.
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), SessionError>;

    /// Waits for and returns the next inbound wire frame.
    async fn recv(&mut self) -> Result<Vec<u8>, SessionError>;

    /// Bytes currently queued in this link's send buffer but not yet
    /// acknowledged by the remote transport.
    fn buffered_amount(&self) -> u64;
}

/// An in-memory [`PeerLink`] pair, for tests that exercise the session
/// manager without a real transport.
pub mod loopback {
    use super::{async_trait, PeerLink, SessionError};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    /// One end of an in-memory loopback link.
    pub struct LoopbackLink {
        tx: mpsc::UnboundedSender<Vec<u8>>,
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
        buffered: Arc<AtomicU64>,
    }

    impl LoopbackLink {
        /// Builds a connected pair of loopback links.
        #[must_use]
        pub fn pair() -> (Self, Self) {
            let (tx_a, rx_b) = mpsc::unbounded_channel();
            let (tx_b, rx_a) = mpsc::unbounded_channel();
            (
                Self {
                    tx: tx_a,
                    rx: rx_a,
                    buffered: Arc::new(AtomicU64::new(0)),
                },
                Self {
                    tx: tx_b,
                    rx: rx_b,
                    buffered: Arc::new(AtomicU64::new(0)),
                },
            )
        }

        /// Lets tests simulate transport-level backpressure.
        pub fn set_buffered_amount(&self, bytes: u64) {
            self.buffered.store(bytes, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl PeerLink for LoopbackLink {
        async fn send(&mut self, frame: Vec<u8>) -> Result<(), SessionError> {
            self.tx
                .send(frame)
                .map_err(|_| SessionError::TransferAborted("loopback peer dropped".to_string()))
        }

        async fn recv(&mut self) -> Result<Vec<u8>, SessionError> {
            self.rx
                .recv()
                .await
                .ok_or_else(|| SessionError::TransferAborted("loopback peer dropped".to_string()))
        }

        fn buffered_amount(&self) -> u64 {
            self.buffered.load(Ordering::SeqCst)
        }
    }
}
