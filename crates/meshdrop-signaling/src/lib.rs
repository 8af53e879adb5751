#![warn(missing_docs)]
#![warn(clippy::all)]

//! # meshdrop-signaling
//!
//! The signaling sub-protocol: a small JSON message set exchanged over a
//! reliable bidirectional channel to coordinate room membership and relay
//! session descriptions/ICE candidates between peers. This crate never
//! touches the actual transfer transport; it only gets peers introduced to
//! each other.

pub mod error;
pub mod message;
pub mod transport;

pub use error::SignalingError;
pub use message::{PeerId, RoomId, SignalingMessage};
pub use transport::{LoopbackTransport, SignalingTransport, WebSocketSignalingTransport};
