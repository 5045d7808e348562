//! Conversation channel event payloads

use super::EncryptionMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
    Audio,
    Document,
    #[serde(other)]
    Other,
}

/// Media referenced by a message. The ciphertext lives in object storage;
/// only the non-secret encryption metadata travels with the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub url: String,
    #[serde(default)]
    pub encryption: Option<EncryptionMetadata>,
}

/// New message broadcast on a conversation channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: u64,
    pub conversation_id: u64,
    pub sender_id: u64,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub media: Option<MediaAttachment>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Typing whisper exchanged directly between clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingPayload {
    pub user_id: u64,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default = "default_true")]
    pub is_typing: bool,
}

fn default_true() -> bool {
    true
}

/// Read receipt for one or more messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub conversation_id: u64,
    pub reader_id: u64,
    #[serde(default)]
    pub message_ids: Vec<u64>,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

/// Delivery confirmation for a single message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: u64,
    pub recipient_id: u64,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Event delivered to a conversation subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Message(MessagePayload),
    Typing(TypingPayload),
    Read(ReadReceipt),
    Delivered(DeliveryReceipt),
}

impl ChannelEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelEvent::Message(_) => "message",
            ChannelEvent::Typing(_) => "typing",
            ChannelEvent::Read(_) => "read",
            ChannelEvent::Delivered(_) => "delivered",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_payload_with_encrypted_media() {
        let json = r#"{
            "id": 42,
            "conversation_id": 7,
            "sender_id": 3,
            "type": "image",
            "media": {
                "url": "conversations/7/abc.bin",
                "encryption": {"iv":"aXY=","authTag":"dGFn","originalSize":1024,"mimeType":"image/png"}
            },
            "created_at": "2024-05-01T10:00:00Z"
        }"#;

        let payload: MessagePayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.kind, MessageKind::Image);
        let media = payload.media.unwrap();
        assert_eq!(media.encryption.unwrap().original_size, 1024);
        assert!(payload.body.is_none());
    }

    #[test]
    fn test_unknown_message_kind() {
        let json = r#"{"id":1,"conversation_id":1,"sender_id":1,"type":"location","body":"here"}"#;
        let payload: MessagePayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.kind, MessageKind::Other);
    }

    #[test]
    fn test_typing_defaults_to_typing() {
        let payload: TypingPayload = serde_json::from_str(r#"{"user_id":5}"#).unwrap();
        assert!(payload.is_typing);
    }
}
