//! Pub/sub transport abstraction

use crate::Result;
use async_trait::async_trait;
use immo_types::TransportConfig;
use tokio::sync::broadcast;

/// Lifecycle and data events emitted by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connecting,
    Connected { socket_id: String },
    Disconnected { reason: Option<String> },
    Error(String),
    /// Event received on a subscribed channel. `channel` is the logical name.
    Message {
        channel: String,
        event: String,
        data: serde_json::Value,
    },
}

/// One shared socket multiplexing private channels.
///
/// Channel names passed in and reported back are logical names such as
/// `conversation.7`; the transport applies its own wire prefix.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Subscribe to lifecycle and message events
    fn events(&self) -> broadcast::Receiver<TransportEvent>;

    /// Open the socket and wait for the handshake, emitting `Connected`
    /// before returning `Ok`. Handshake failures are reported through the
    /// returned error only, not as an `Error` event.
    async fn connect(&self, config: &TransportConfig, token: &str) -> Result<()>;

    /// Close the socket. Must not emit `Disconnected`.
    async fn disconnect(&self);

    /// Authorize and join a private channel. Fails if the server refuses it.
    async fn subscribe_private(&self, channel: &str) -> Result<()>;

    async fn leave(&self, channel: &str);

    /// Unacknowledged client-to-client broadcast
    async fn whisper(&self, channel: &str, event: &str, payload: serde_json::Value) -> Result<()>;
}
