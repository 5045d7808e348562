//! Encryption types (definitions only, no implementation)

use serde::{Deserialize, Serialize};

/// AES-256 key length in bytes
pub const KEY_LENGTH: usize = 32;

/// AES-GCM IV length in bytes
pub const IV_LENGTH: usize = 12;

/// AES-GCM authentication tag length in bytes
pub const AUTH_TAG_LENGTH: usize = 16;

/// AES-GCM initialization vector (12 bytes)
pub type Iv = [u8; IV_LENGTH];

/// AES-GCM authentication tag (16 bytes)
pub type AuthTag = [u8; AUTH_TAG_LENGTH];

/// The part of an encrypted media item that may be persisted or sent over
/// the network. Never contains key material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionMetadata {
    /// Base64 encoded IV
    pub iv: String,
    /// Base64 encoded authentication tag
    pub auth_tag: String,
    /// Plaintext size in bytes
    pub original_size: u64,
    pub mime_type: String,
    /// Playback duration in seconds, for audio and video
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_wire_names() {
        let metadata = EncryptionMetadata {
            iv: "AAAAAAAAAAAAAAAA".to_string(),
            auth_tag: "AAAAAAAAAAAAAAAAAAAAAA==".to_string(),
            original_size: 10,
            mime_type: "image/jpeg".to_string(),
            duration: None,
        };

        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["authTag"], "AAAAAAAAAAAAAAAAAAAAAA==");
        assert_eq!(value["originalSize"], 10);
        assert_eq!(value["mimeType"], "image/jpeg");
        assert!(value.get("duration").is_none());
        assert!(value.get("key").is_none());
    }

    #[test]
    fn test_metadata_with_duration() {
        let json = r#"{"iv":"x","authTag":"y","originalSize":2048,"mimeType":"audio/m4a","duration":12.5}"#;
        let metadata: EncryptionMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.duration, Some(12.5));
        assert_eq!(metadata.original_size, 2048);
    }
}
