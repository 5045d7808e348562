//! Realtime transport over the broadcasting WebSocket server

mod protocol;
mod pusher;

pub use pusher::PusherTransport;

use async_trait::async_trait;
use immo_core::Result;

/// Signs private channel subscriptions for a socket
#[async_trait]
pub trait ChannelAuthorizer: Send + Sync {
    /// Returns the `auth` string expected by `pusher:subscribe`
    async fn authorize(&self, token: &str, socket_id: &str, channel_name: &str) -> Result<String>;
}
