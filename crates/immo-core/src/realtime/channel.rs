//! Conversation channel naming, event parsing and subscriber callbacks

use crate::Result;
use immo_types::{
    ChannelEvent, DeliveryReceipt, MessagePayload, ReadReceipt, TypingPayload,
};
use std::sync::Arc;

/// Logical channel namespace for conversations
pub const CONVERSATION_CHANNEL_PREFIX: &str = "conversation.";

pub const EVENT_MESSAGE_SENT: &str = "message.sent";
pub const EVENT_MESSAGE_READ: &str = "message.read";
pub const EVENT_MESSAGE_DELIVERED: &str = "message.delivered";

/// Whisper event name as passed to `PubSubTransport::whisper`
pub const WHISPER_TYPING: &str = "typing";

/// Prefix the wire protocol applies to client whispers
pub const WHISPER_EVENT_PREFIX: &str = "client-";

pub fn conversation_channel(conversation_id: &str) -> String {
    format!("{}{}", CONVERSATION_CHANNEL_PREFIX, conversation_id)
}

pub fn conversation_id_from_channel(channel: &str) -> Option<&str> {
    channel
        .strip_prefix(CONVERSATION_CHANNEL_PREFIX)
        .filter(|id| !id.is_empty())
}

/// Parse a raw channel event. Unknown event names yield `Ok(None)`.
pub fn parse_event(event: &str, data: serde_json::Value) -> Result<Option<ChannelEvent>> {
    // Broadcast-as names may arrive with a leading dot
    let name = event.trim_start_matches('.');

    let parsed = match name {
        EVENT_MESSAGE_SENT => {
            // The backend wraps the model under `message`
            let payload = match data.get("message") {
                Some(inner) if inner.is_object() => inner.clone(),
                _ => data,
            };
            ChannelEvent::Message(serde_json::from_value::<MessagePayload>(payload)?)
        }
        EVENT_MESSAGE_READ => ChannelEvent::Read(serde_json::from_value::<ReadReceipt>(data)?),
        EVENT_MESSAGE_DELIVERED => {
            ChannelEvent::Delivered(serde_json::from_value::<DeliveryReceipt>(data)?)
        }
        other => match other.strip_prefix(WHISPER_EVENT_PREFIX) {
            Some(WHISPER_TYPING) => {
                ChannelEvent::Typing(serde_json::from_value::<TypingPayload>(data)?)
            }
            _ => return Ok(None),
        },
    };

    Ok(Some(parsed))
}

type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Listeners for the four conversation event kinds.
///
/// Callbacks run on the realtime event task and must not block. They are
/// invoked at least once per transport delivery; deduplicate by message id
/// if needed.
#[derive(Clone, Default)]
pub struct ChannelCallbacks {
    on_message: Option<Callback<MessagePayload>>,
    on_typing: Option<Callback<TypingPayload>>,
    on_read: Option<Callback<ReadReceipt>>,
    on_delivered: Option<Callback<DeliveryReceipt>>,
}

impl ChannelCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_message(mut self, f: impl Fn(MessagePayload) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(f));
        self
    }

    pub fn on_typing(mut self, f: impl Fn(TypingPayload) + Send + Sync + 'static) -> Self {
        self.on_typing = Some(Arc::new(f));
        self
    }

    pub fn on_read(mut self, f: impl Fn(ReadReceipt) + Send + Sync + 'static) -> Self {
        self.on_read = Some(Arc::new(f));
        self
    }

    pub fn on_delivered(mut self, f: impl Fn(DeliveryReceipt) + Send + Sync + 'static) -> Self {
        self.on_delivered = Some(Arc::new(f));
        self
    }

    pub(crate) fn dispatch(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Message(payload) => {
                if let Some(f) = &self.on_message {
                    f(payload)
                }
            }
            ChannelEvent::Typing(payload) => {
                if let Some(f) = &self.on_typing {
                    f(payload)
                }
            }
            ChannelEvent::Read(payload) => {
                if let Some(f) = &self.on_read {
                    f(payload)
                }
            }
            ChannelEvent::Delivered(payload) => {
                if let Some(f) = &self.on_delivered {
                    f(payload)
                }
            }
        }
    }
}
