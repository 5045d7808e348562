//! API client for the ImmoGuinée backend

use crate::config::SettingsManager;
use crate::transport::ChannelAuthorizer;
use async_trait::async_trait;
use immo_core::ports::{ConfigSource, TokenSource};
use immo_core::{ImmoError, Result, Settings, TransportConfig};
use reqwest::Client as ReqwestClient;
use serde::Deserialize;

pub struct ApiClient {
    http: ReqwestClient,
    base_url: String,
}

/// Body of `GET /broadcasting/config`
#[derive(Debug, Default, Deserialize)]
struct BroadcastingConfig {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    scheme: Option<String>,
}

impl BroadcastingConfig {
    /// `None` when the backend has broadcasting switched off
    fn into_transport_config(self) -> Option<TransportConfig> {
        let key = self.key.filter(|k| !k.is_empty())?;
        let host = self.host.filter(|h| !h.is_empty())?;
        let scheme = self.scheme.unwrap_or_else(|| "https".to_string());
        let port = self
            .port
            .unwrap_or(if scheme.eq_ignore_ascii_case("https") { 443 } else { 80 });

        Some(TransportConfig {
            key,
            host,
            port,
            scheme,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChannelAuthResponse {
    auth: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: ReqwestClient::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.api_url.clone())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl ConfigSource for ApiClient {
    async fn fetch_config(&self, token: &str) -> Result<Option<TransportConfig>> {
        let response = self
            .http
            .get(self.endpoint("broadcasting/config"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ImmoError::ConfigUnavailable(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ImmoError::ConfigUnavailable(format!(
                "broadcasting config returned {}",
                response.status()
            )));
        }

        let body: BroadcastingConfig = response
            .json()
            .await
            .map_err(|e| ImmoError::ConfigUnavailable(format!("invalid response: {}", e)))?;

        Ok(body.into_transport_config())
    }
}

#[async_trait]
impl TokenSource for ApiClient {
    async fn bearer_token(&self) -> Result<Option<String>> {
        // Re-read on every attempt so `immo auth login` in another shell is picked up
        let settings = SettingsManager::load()
            .map_err(|e| ImmoError::AuthenticationFailed(format!("cannot read settings: {}", e)))?;
        Ok(settings.access_token.filter(|t| !t.is_empty()))
    }
}

#[async_trait]
impl ChannelAuthorizer for ApiClient {
    async fn authorize(&self, token: &str, socket_id: &str, channel_name: &str) -> Result<String> {
        let response = self
            .http
            .post(self.endpoint("broadcasting/auth"))
            .bearer_auth(token)
            .json(&serde_json::json!({
                "socket_id": socket_id,
                "channel_name": channel_name,
            }))
            .send()
            .await
            .map_err(|e| ImmoError::Transport(format!("channel auth request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ImmoError::AuthenticationFailed(format!(
                "{} for {}",
                status, channel_name
            )));
        }

        let body: ChannelAuthResponse = response
            .json()
            .await
            .map_err(|e| ImmoError::AuthenticationFailed(format!("invalid auth response: {}", e)))?;
        Ok(body.auth)
    }
}
