//! Pusher protocol v7 frames
//!
//! Every frame is a JSON object `{event, channel?, data?}`. Server frames
//! usually carry `data` as a JSON document encoded in a string.

use immo_core::{ImmoError, Result, TransportConfig};
use serde::Deserialize;
use serde_json::{json, Value};

pub const PROTOCOL_VERSION: u8 = 7;
pub const CLIENT_NAME: &str = "immo-cli";

/// Wire prefix for channels requiring authorization
pub const PRIVATE_PREFIX: &str = "private-";

/// Used when the server does not announce an activity timeout
pub const DEFAULT_ACTIVITY_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

/// Decoded server frame
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    ConnectionEstablished {
        socket_id: String,
        activity_timeout: u64,
    },
    Ping,
    Pong,
    Error {
        code: Option<u16>,
        message: String,
    },
    SubscriptionSucceeded {
        channel: String,
    },
    /// The server refused a `pusher:subscribe`, usually a failed authorization
    SubscriptionError {
        channel: String,
        message: String,
    },
    /// Application or client event on a channel. `channel` is the wire name.
    ChannelEvent {
        channel: String,
        event: String,
        data: Value,
    },
    /// Protocol event we do not act on
    Other(String),
}

pub fn socket_url(config: &TransportConfig) -> String {
    let scheme = if config.uses_tls() { "wss" } else { "ws" };
    format!(
        "{}://{}:{}/app/{}?protocol={}&client={}&version={}",
        scheme,
        config.host,
        config.port,
        config.key,
        PROTOCOL_VERSION,
        CLIENT_NAME,
        env!("CARGO_PKG_VERSION")
    )
}

pub fn wire_channel(logical: &str) -> String {
    format!("{}{}", PRIVATE_PREFIX, logical)
}

pub fn logical_channel(wire: &str) -> &str {
    wire.strip_prefix(PRIVATE_PREFIX).unwrap_or(wire)
}

pub fn decode_frame(text: &str) -> Result<ServerFrame> {
    let raw: RawFrame = serde_json::from_str(text)?;
    let data = decode_data(raw.data);

    let frame = match raw.event.as_str() {
        "pusher:connection_established" => {
            let socket_id = data
                .get("socket_id")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ImmoError::Transport("connection_established without socket_id".into())
                })?
                .to_string();
            let activity_timeout = data
                .get("activity_timeout")
                .and_then(Value::as_u64)
                .unwrap_or(DEFAULT_ACTIVITY_TIMEOUT_SECS);

            ServerFrame::ConnectionEstablished {
                socket_id,
                activity_timeout,
            }
        }
        "pusher:ping" => ServerFrame::Ping,
        "pusher:pong" => ServerFrame::Pong,
        "pusher:error" => ServerFrame::Error {
            code: data
                .get("code")
                .and_then(Value::as_u64)
                .and_then(|c| u16::try_from(c).ok()),
            message: data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        },
        "pusher_internal:subscription_succeeded" => ServerFrame::SubscriptionSucceeded {
            channel: raw.channel.unwrap_or_default(),
        },
        "pusher:subscription_error" => ServerFrame::SubscriptionError {
            channel: raw.channel.unwrap_or_default(),
            message: data
                .get("error")
                .and_then(Value::as_str)
                .map(String::from)
                .or_else(|| data.get("status").map(|status| format!("status {}", status)))
                .unwrap_or_else(|| "subscription rejected".to_string()),
        },
        event if event.starts_with("pusher:") || event.starts_with("pusher_internal:") => {
            ServerFrame::Other(raw.event)
        }
        _ => match raw.channel {
            Some(channel) => ServerFrame::ChannelEvent {
                channel,
                event: raw.event,
                data,
            },
            None => ServerFrame::Other(raw.event),
        },
    };

    Ok(frame)
}

/// `data` is usually a JSON string; fall back to the raw value
fn decode_data(data: Option<Value>) -> Value {
    match data {
        Some(Value::String(text)) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        Some(value) => value,
        None => Value::Null,
    }
}

pub fn subscribe_frame(wire_channel: &str, auth: &str) -> String {
    json!({
        "event": "pusher:subscribe",
        "data": {"auth": auth, "channel": wire_channel}
    })
    .to_string()
}

pub fn unsubscribe_frame(wire_channel: &str) -> String {
    json!({
        "event": "pusher:unsubscribe",
        "data": {"channel": wire_channel}
    })
    .to_string()
}

pub fn client_event_frame(wire_channel: &str, event: &str, data: Value) -> String {
    json!({
        "event": format!("client-{}", event),
        "channel": wire_channel,
        "data": data
    })
    .to_string()
}

pub fn ping_frame() -> String {
    json!({"event": "pusher:ping", "data": {}}).to_string()
}

pub fn pong_frame() -> String {
    json!({"event": "pusher:pong", "data": {}}).to_string()
}
