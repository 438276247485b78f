/// Wire shapes exchanged with clients
///
/// Inbound: every data frame is a handshake attempt.
/// Outbound: error envelopes, broker payloads forwarded verbatim, and pongs.
use super::Uid;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Handshake request sent by the client
///
/// Missing fields take their zero value, so an absent timestamp is later
/// rejected as expired rather than as a parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    #[serde(default)]
    pub uid: Uid,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub checksum: String,
}

/// Payload could not be read as a handshake
#[derive(Debug, Error)]
#[error("invalid handshake payload: {0}")]
pub struct EnvelopeError(#[from] serde_json::Error);

impl Handshake {
    /// Parse a raw frame body
    pub fn from_slice(raw: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(raw)?)
    }
}

/// Error response; the connection stays open after it is sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: String,
}

impl ErrorEnvelope {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> String {
        // A struct with one string field cannot fail to serialize
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{\"error\":\"internal\"}"))
    }
}

/// Frames queued for a session's writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Handshake rejection
    Error(ErrorEnvelope),

    /// Broker delivery body, forwarded byte for byte
    Payload(Bytes),

    /// Reply to a client ping
    Pong(Bytes),
}

/// Frames read from a client transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Close,
    /// Pongs, continuations and other control traffic
    Other,
}
