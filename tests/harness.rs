//! Shared plumbing for driving a sender/receiver pair over a loopback
//! [`PeerLink`] to completion, used by the integration tests in this crate.
//!
//! This mirrors `meshdrop-cli`'s `--demo` loop: read a frame, hand it to the
//! receiver, read the (always-plaintext) header back out to ack the sender.
//! It stands in for "the negotiated datagram/stream connection" the real
//! spec treats as an external collaborator.

use std::sync::Arc;

use meshdrop_session::loopback::LoopbackLink;
use meshdrop_session::{ReceiverSession, SenderSession, SessionError};

/// Feeds every frame `sender` emits for `peer_id` into `receiver` and acks
/// it back, until the receiver reports the manifest complete. Returns the
/// number of frames applied.
pub async fn drive_to_completion(
    sender: &Arc<SenderSession>,
    receiver: &ReceiverSession,
    peer_id: &str,
    link_b: &mut LoopbackLink,
) -> Result<u64, SessionError> {
    let mut remote_counter = 0u64;
    loop {
        let frame = link_b.recv().await?;
        let header = meshdrop_core::frame::FrameHeader::from_bytes(&frame)?;
        receiver.on_wire_frame(peer_id, remote_counter, &frame).await?;
        sender.record_ack(peer_id, remote_counter as u32, u64::from(header.payload_len)).await;
        remote_counter += 1;
        if receiver.is_complete().await {
            return Ok(remote_counter);
        }
    }
}
