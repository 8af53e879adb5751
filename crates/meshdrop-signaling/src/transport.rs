//! Pluggable signaling channel: a WebSocket implementation for real use and
//! an in-memory loopback pair for tests.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::SignalingError;
use crate::message::SignalingMessage;

/// A reliable, bidirectional channel carrying [`SignalingMessage`] values.
///
/// Implementors need not preserve message boundaries beyond what JSON
/// framing already guarantees; each `send` corresponds to exactly one
/// `recv` on the peer end.
#[async_trait]
pub trait SignalingTransport: Send {
    /// Sends one message, blocking until it is handed to the transport.
    async fn send(&mut self, message: &SignalingMessage) -> Result<(), SignalingError>;

    /// Waits for and returns the next message.
    ///
    /// Returns [`SignalingError::ConnectionLost`] if the channel closes
    /// while waiting.
    async fn recv(&mut self) -> Result<SignalingMessage, SignalingError>;
}

/// WebSocket-backed signaling transport, grounded on the pack's use of
/// `tokio-tungstenite` for signaling-shaped rendezvous channels.
pub struct WebSocketSignalingTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WebSocketSignalingTransport {
    /// Connects to a signaling server at `url` (e.g. `wss://host/signal`).
    ///
    /// # Errors
    ///
    /// Returns [`SignalingError::Unavailable`] if the handshake fails.
    pub async fn connect(url: &str) -> Result<Self, SignalingError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| SignalingError::Unavailable(e.to_string()))?;
        debug!(url, "connected to signaling server");
        Ok(Self { stream })
    }
}

#[async_trait]
impl SignalingTransport for WebSocketSignalingTransport {
    async fn send(&mut self, message: &SignalingMessage) -> Result<(), SignalingError> {
        let text = serde_json::to_string(message).map_err(|e| SignalingError::MalformedFrame(e.to_string()))?;
        self.stream
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| SignalingError::ConnectionLost(e.to_string()))
    }

    async fn recv(&mut self) -> Result<SignalingMessage, SignalingError> {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    return serde_json::from_str(&text).map_err(|e| SignalingError::MalformedFrame(e.to_string()));
                }
                Some(Ok(WsMessage::Binary(bytes))) => {
                    return serde_json::from_slice(&bytes).map_err(|e| SignalingError::MalformedFrame(e.to_string()));
                }
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
                Some(Ok(WsMessage::Close(frame))) => {
                    return Err(SignalingError::ConnectionLost(format!("{frame:?}")));
                }
                Some(Ok(WsMessage::Frame(_))) => continue,
                Some(Err(e)) => {
                    warn!(error = %e, "signaling websocket error");
                    return Err(SignalingError::ConnectionLost(e.to_string()));
                }
                None => return Err(SignalingError::ConnectionLost("stream closed".to_string())),
            }
        }
    }
}

/// In-memory loopback transport, for unit and integration tests that need
/// two ends of a signaling channel without a real server.
pub struct LoopbackTransport {
    tx: mpsc::UnboundedSender<SignalingMessage>,
    rx: mpsc::UnboundedReceiver<SignalingMessage>,
}

impl LoopbackTransport {
    /// Builds a connected pair: messages sent on one end arrive on the
    /// other, and vice versa.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_b) = mpsc::unbounded_channel();
        let (tx_b, rx_a) = mpsc::unbounded_channel();
        (Self { tx: tx_a, rx: rx_a }, Self { tx: tx_b, rx: rx_b })
    }
}

#[async_trait]
impl SignalingTransport for LoopbackTransport {
    async fn send(&mut self, message: &SignalingMessage) -> Result<(), SignalingError> {
        self.tx
            .send(message.clone())
            .map_err(|_| SignalingError::ConnectionLost("loopback peer dropped".to_string()))
    }

    async fn recv(&mut self) -> Result<SignalingMessage, SignalingError> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| SignalingError::ConnectionLost("loopback peer dropped".to_string()))
    }
}
