//! Credential and connection-config sources

use crate::Result;
use async_trait::async_trait;
use immo_types::TransportConfig;

/// Source of the bearer token used for the socket and channel authorization
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Current token, or `None` when the user is logged out.
    /// Called before every connection attempt so refreshed tokens are picked up.
    async fn bearer_token(&self) -> Result<Option<String>>;
}

/// Remote endpoint serving the broadcasting configuration
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// `Ok(None)` means the backend has no broadcasting configured.
    async fn fetch_config(&self, token: &str) -> Result<Option<TransportConfig>>;
}
