//! Wire-format frames exchanged with the gateway.
//!
//! Every text message on the socket carries exactly one JSON object tagged by
//! its `type` field:
//!
//! - `req`: `{type, id, method, params?}`
//! - `res`: `{type, id, ok, payload?, error?}`
//! - `event`: `{type, event, payload?, seq?}`

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Event name the gateway uses to deliver the handshake nonce.
pub const CONNECT_CHALLENGE_EVENT: &str = "connect.challenge";

/// Method name of the handshake request.
pub const CONNECT_METHOD: &str = "connect";

/// Any frame on the socket.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Client → gateway request.
    #[serde(rename = "req")]
    Request(RequestFrame),
    /// Gateway → client response to a request.
    #[serde(rename = "res")]
    Response(ResponseFrame),
    /// Unsolicited gateway event.
    #[serde(rename = "event")]
    Event(EventFrame),
}

impl Frame {
    /// Parse a single text message.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Outgoing request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Correlation id, unique among pending requests.
    pub id: String,
    /// Method name (e.g. `sessions.list`).
    pub method: String,
    /// Optional parameters object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestFrame {
    /// Build a request frame.
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Serialize as a tagged `req` frame.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        #[derive(Serialize)]
        struct Tagged<'a> {
            #[serde(rename = "type")]
            kind: &'static str,
            #[serde(flatten)]
            frame: &'a RequestFrame,
        }
        serde_json::to_string(&Tagged {
            kind: "req",
            frame: self,
        })
    }
}

/// Response to a request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Echoed request id.
    pub id: String,
    /// Whether the call succeeded.
    #[serde(default)]
    pub ok: bool,
    /// Result payload when `ok`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Error body when not `ok`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

impl ResponseFrame {
    /// Convert into the call outcome.
    ///
    /// A failed response without an error body becomes a generic remote error.
    pub fn into_result(self) -> Result<Value, RemoteError> {
        if self.ok {
            Ok(self.payload.unwrap_or(Value::Null))
        } else {
            Err(self.error.unwrap_or_else(|| RemoteError::new("request failed")))
        }
    }
}

/// Unsolicited server event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    /// Event name (e.g. `chat`, `agent`, `connect.challenge`).
    pub event: String,
    /// Event payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Gateway sequence number, when the gateway provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl EventFrame {
    /// String field from the payload object.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.as_ref()?.get(key)?.as_str()
    }
}

/// Structured error returned by the gateway for a specific request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Machine-readable code; numeric codes are kept as their decimal string.
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub code: Option<String>,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl RemoteError {
    /// Error with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            details: None,
        }
    }

    /// Attach a code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach details.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// String field from the details object.
    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.as_ref()?.get(key)?.as_str()
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            match &self.code {
                Some(code) => write!(f, "request failed ({code})"),
                None => f.write_str("request failed"),
            }
        } else {
            f.write_str(&self.message)
        }
    }
}

impl std::error::Error for RemoteError {}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    })
}
