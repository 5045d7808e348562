//! Immo Core Library
//!
//! End-to-end media encryption, the realtime conversation connection, and
//! the port traits platform adapters implement.

// Re-export pure types from immo-types
pub use immo_types::*;

pub mod crypto;
pub mod encoding;
pub mod error;
pub mod media;
pub mod ports;
pub mod realtime;

#[cfg(feature = "crypto")]
pub use crypto::AesGcmCipher;
pub use crypto::{EncryptedMedia, EncryptionKey, MediaCipher};
pub use error::{ImmoError, Result};
pub use media::{MediaPipeline, StoredMedia};
pub use realtime::{ChannelCallbacks, ConnectionManager, ReconnectPolicy};
