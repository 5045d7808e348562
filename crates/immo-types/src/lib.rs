//! Immo Types - Pure type definitions shared by the media and realtime layers
//!
//! This crate contains only plain data types with no async runtime
//! dependencies, so it can be consumed by any client target.

pub mod encryption;
pub mod message;
pub mod realtime;

pub use encryption::*;
pub use message::*;
pub use realtime::*;

use serde::{Deserialize, Serialize};

/// Default API root of the marketplace backend
pub const DEFAULT_API_URL: &str = "https://api.immoguinee.com/api";

/// Reconnection tuning persisted with the settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectSettings {
    pub base_delay_ms: u64,
    pub max_attempts: u32,
    pub max_delay_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_attempts: 5,
            max_delay_ms: 30_000,
        }
    }
}

/// Settings persisted to disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub version: String,
    pub api_url: String,
    pub access_token: Option<String>,
    #[serde(default)]
    pub reconnect: ReconnectSettings,
    /// Directory used by the local media store; `None` means `<home>/media`
    #[serde(default)]
    pub media_dir: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            access_token: None,
            reconnect: ReconnectSettings::default(),
            media_dir: None,
        }
    }
}
