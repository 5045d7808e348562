//! Shared realtime connection and conversation channels

mod backoff;
mod channel;
mod manager;

pub use backoff::{ReconnectPolicy, ReconnectState};
pub use channel::{
    conversation_channel, conversation_id_from_channel, parse_event, ChannelCallbacks,
    CONVERSATION_CHANNEL_PREFIX, EVENT_MESSAGE_DELIVERED, EVENT_MESSAGE_READ, EVENT_MESSAGE_SENT,
    WHISPER_EVENT_PREFIX, WHISPER_TYPING,
};
pub use manager::{ConnectOutcome, ConnectionManager, ReconnectStatus, SubscriptionHandle};
