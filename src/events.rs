//! Events delivered to the application layer.
//!
//! Inbound protocol envelopes are demultiplexed into these variants at the
//! transport boundary; audio arrives already base64-decoded so consumers
//! never deal with the transport encoding.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events received from the live endpoint, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Session setup was acknowledged by the server.
    SetupComplete,

    /// A chunk of synthesized output audio (raw PCM bytes at the playback
    /// rate, decoded from the wire encoding).
    AudioDelta {
        /// Raw PCM16 bytes.
        data: Vec<u8>,
    },

    /// A chunk of output text.
    TextDelta {
        /// Text content.
        text: String,
    },

    /// The model invoked a client-side tool.
    ToolCall(ToolCall),

    /// The current model turn is complete.
    TurnComplete,

    /// The connection closed. Emitted exactly once per session.
    ConnectionClosed {
        /// WebSocket close code (1005 when the peer sent no status,
        /// 1006 when the connection dropped without a close frame).
        code: u16,
        /// Human-readable close reason.
        reason: String,
        /// Classified cause, for user-facing messaging.
        cause: CloseCause,
    },

    /// A message shape this client does not recognize. Forwarded rather
    /// than dropped so the application can log or ignore it.
    Unhandled {
        /// The raw JSON envelope.
        raw: Value,
    },
}

/// Why the connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseCause {
    /// Clean close.
    Normal,
    /// Server-side error.
    Error,
    /// Resource exhaustion: the API key ran out of quota.
    Quota,
}

/// Close code sent by the server for internal errors, including quota
/// exhaustion.
const CLOSE_INTERNAL_ERROR: u16 = 1011;
const CLOSE_NORMAL: u16 = 1000;

impl CloseCause {
    /// Classify a close code/reason pair.
    ///
    /// Code 1011 with a quota-mentioning reason is a billing problem and
    /// gets distinct user messaging; everything else non-normal is a
    /// generic server error.
    pub fn classify(code: u16, reason: &str) -> Self {
        if code == CLOSE_INTERNAL_ERROR && reason.to_ascii_lowercase().contains("quota") {
            Self::Quota
        } else if code == CLOSE_NORMAL {
            Self::Normal
        } else {
            Self::Error
        }
    }
}

/// A tool invocation from the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque call identifier, unique within the session. Responses are
    /// correlated by this id.
    pub id: String,
    /// Tool name (one of the declared set).
    pub name: String,
    /// Tool-specific structured arguments.
    pub args: Value,
}

/// A tool result to send back to the model.
///
/// Every tool call the application acts on must produce exactly one
/// response with the matching id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    /// The call id being responded to.
    pub id: String,
    /// The tool name.
    pub name: String,
    /// The result payload.
    pub result: Value,
}

impl ToolResponse {
    /// Create a new tool response.
    pub fn new(id: impl Into<String>, name: impl Into<String>, result: impl Serialize) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            result: serde_json::to_value(result).unwrap_or(Value::Null),
        }
    }

    /// Respond to a call directly.
    pub fn to_call(call: &ToolCall, result: impl Serialize) -> Self {
        Self::new(call.id.clone(), call.name.clone(), result)
    }
}
