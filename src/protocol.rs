//! Wire types for the recognition channel.
//!
//! Every frame on the channel is a JSON text message discriminated by its
//! `type` field. The client sends [`ClientMessage`]s and receives
//! [`ServerMessage`]s; anything else is logged and dropped by the caller.

use serde::{Deserialize, Serialize};

/// Normal closure. The only close code that does not trigger a reconnect.
pub const CLOSE_NORMAL: u16 = 1000;
/// Closed without a close frame (transport failure).
pub const CLOSE_ABNORMAL: u16 = 1006;
/// The service rejected the connection because no token was supplied.
pub const CLOSE_MISSING_TOKEN: u16 = 4001;
/// The service rejected the connection because the token matched no user.
pub const CLOSE_UNKNOWN_USER: u16 = 4002;

/// Reason string sent with a normal closure on teardown.
pub const CLOSE_REASON_TEARDOWN: &str = "App closing";

/// Client → service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// One captured frame as a `data:image/jpeg;base64,...` URI.
    Image { image: String },
    /// Keepalive; the service echoes the timestamp back in a `pong`.
    Ping { timestamp: i64 },
}

impl ClientMessage {
    pub fn to_json(&self) -> String {
        // A tagged enum of strings and integers always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Service → client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    FaceDetectionResult {
        /// Ordered by confidence, most confident first. Empty means no match.
        #[serde(default)]
        identified_people: Vec<IdentifiedPerson>,
        #[serde(default)]
        message: Option<String>,
    },
    Error {
        #[serde(default)]
        message: String,
        #[serde(default)]
        critical: bool,
    },
    ConnectionEstablished {
        #[serde(default)]
        message: Option<String>,
    },
    Pong {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifiedPerson {
    pub person_name: String,
    /// The service formats this as `"87.50%"`; bare numbers are accepted too.
    #[serde(default)]
    pub confidence: Option<serde_json::Value>,
}

impl IdentifiedPerson {
    pub fn confidence_percent(&self) -> Option<f64> {
        match self.confidence.as_ref()? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
            _ => None,
        }
    }
}
