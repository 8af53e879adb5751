//! Session/swarm manager: room lifecycle, batch admission, and the
//! send/receive orchestration that drives the lower layers (framing,
//! packaging, chunk production, piece scheduling) into one coherent
//! many-peer transfer.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod error;
mod events;
mod manifest;
mod peer_link;
mod reconnect;
mod receiver;
mod room;
mod sender;

pub use config::{EncryptionConfig, SessionConfig};
pub use error::SessionError;
pub use events::SessionEvent;
pub use manifest::{FileEntry, Manifest};
pub use peer_link::{loopback, PeerLink};
pub use reconnect::ReconnectPolicy;
pub use receiver::ReceiverSession;
pub use room::{generate_room_id, PeerInRoom, PeerRole, PeerRoomState, Room, RoomState};
pub use sender::SenderSession;
