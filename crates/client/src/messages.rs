//! Push-channel message types and parser.
//!
//! The service sends JSON frames shaped as `{"type": "<kind>", "data":
//! {...}}`. Inbound frames are decoded into [`PushMessage`]; outbound
//! liveness frames are produced by [`OutboundMessage`].

use chrono::Utc;
use engage_core::job::JobUpdate;
use engage_core::push_messages::{
    MSG_TYPE_ERROR, MSG_TYPE_INFO, MSG_TYPE_LOG, MSG_TYPE_PING, MSG_TYPE_PONG, MSG_TYPE_STATUS,
};
use serde::{Deserialize, Serialize};

/// All known inbound push-channel message types.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    /// A single server-side log line.
    Log(LogData),
    /// A partial job update.
    Status(JobUpdate),
    /// A server-reported problem; the session stays open.
    Error(NoticeData),
    /// Informational notice (connection confirmation, job finished).
    Info(NoticeData),
    /// Liveness probe that must be answered with a pong.
    Ping,
    /// Reply to our own ping.
    Pong,
}

/// Payload for `log` messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogData {
    #[serde(default)]
    pub timestamp: String,
    pub message: String,
}

/// Payload for `error` and `info` messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NoticeData {
    #[serde(default)]
    pub message: String,
}

/// Raw frame before the `data` payload is interpreted.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Reasons a frame could not be decoded. Both are protocol violations:
/// logged, never fatal to the session.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown message type '{0}'")]
    UnknownType(String),
}

/// Parse a push-channel text frame into a typed message.
///
/// `ping`/`pong` frames may omit `data`; every other type requires it.
pub fn parse_message(text: &str) -> Result<PushMessage, ParseError> {
    let envelope: Envelope = serde_json::from_str(text)?;

    let message = match envelope.kind.as_str() {
        MSG_TYPE_LOG => PushMessage::Log(serde_json::from_value(envelope.data)?),
        MSG_TYPE_STATUS => PushMessage::Status(serde_json::from_value(envelope.data)?),
        MSG_TYPE_ERROR => PushMessage::Error(serde_json::from_value(envelope.data)?),
        MSG_TYPE_INFO => PushMessage::Info(serde_json::from_value(envelope.data)?),
        MSG_TYPE_PING => PushMessage::Ping,
        MSG_TYPE_PONG => PushMessage::Pong,
        other => return Err(ParseError::UnknownType(other.to_string())),
    };

    Ok(message)
}

/// Frames sent by the client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum OutboundMessage {
    Ping(Heartbeat),
    Pong(Heartbeat),
}

#[derive(Debug, Clone, Serialize)]
pub struct Heartbeat {
    pub timestamp: String,
}

impl OutboundMessage {
    pub fn ping() -> Self {
        Self::Ping(Heartbeat::now())
    }

    pub fn pong() -> Self {
        Self::Pong(Heartbeat::now())
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Heartbeat {
    fn now() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}
