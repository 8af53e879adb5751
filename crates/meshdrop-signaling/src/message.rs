//! Wire messages for the signaling sub-protocol.
//!
//! Every message is a JSON object `{ "type": Tag, "payload": { ... } }` with
//! snake_case fields. `sdp` and `candidate` are carried as opaque strings;
//! this crate never inspects their contents.

use serde::{Deserialize, Serialize};

/// A peer identifier assigned by the signaling server on room join.
pub type PeerId = String;
/// A room identifier chosen by the session initiator.
pub type RoomId = String;

/// One signaling message, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SignalingMessage {
    /// client→server: request to join a room.
    JoinRoom {
        /// Room to join.
        room_id: RoomId,
    },
    /// server→client: admission confirmed, with the peer's assigned id.
    RoomJoined {
        /// The room just joined.
        room_id: RoomId,
        /// The id the server assigned to this connection.
        peer_id: PeerId,
    },
    /// server→client: another peer joined the room.
    PeerJoined {
        /// The newly joined peer's id.
        peer_id: PeerId,
    },
    /// either direction: session description offer.
    Offer {
        /// Room the offer concerns.
        room_id: RoomId,
        /// Destination peer id.
        target: PeerId,
        /// Opaque session-description payload.
        sdp: String,
    },
    /// either direction: session description answer.
    Answer {
        /// Room the answer concerns.
        room_id: RoomId,
        /// Destination peer id.
        target: PeerId,
        /// Opaque session-description payload.
        sdp: String,
    },
    /// either direction: ICE candidate relay.
    IceCandidate {
        /// Room the candidate concerns.
        room_id: RoomId,
        /// Destination peer id.
        target: PeerId,
        /// Opaque candidate payload.
        candidate: String,
    },
    /// client→server: voluntary departure from a room.
    LeaveRoom {
        /// Room being left.
        room_id: RoomId,
    },
    /// server→client: a protocol- or application-level error.
    Error {
        /// Human-readable error description.
        message: String,
    },
}

impl SignalingMessage {
    /// The destination peer id, for messages that require one
    /// (`Offer`/`Answer`/`IceCandidate`).
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Offer { target, .. } | Self::Answer { target, .. } | Self::IceCandidate { target, .. } => {
                Some(target.as_str())
            }
            _ => None,
        }
    }

    /// The room id this message concerns, if any.
    #[must_use]
    pub fn room_id(&self) -> Option<&str> {
        match self {
            Self::JoinRoom { room_id }
            | Self::RoomJoined { room_id, .. }
            | Self::Offer { room_id, .. }
            | Self::Answer { room_id, .. }
            | Self::IceCandidate { room_id, .. }
            | Self::LeaveRoom { room_id } => Some(room_id.as_str()),
            Self::PeerJoined { .. } | Self::Error { .. } => None,
        }
    }
}
