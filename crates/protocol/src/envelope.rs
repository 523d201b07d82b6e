use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::MAX_FRAME_SIZE;

/// Errors raised while decoding a frame from the stream.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame too large ({size} bytes, limit {limit})")]
    TooLarge { size: usize, limit: usize },
}

/// Timestamp as sent by the server: either epoch milliseconds or RFC 3339.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    Millis(i64),
    Fractional(f64),
    Text(String),
}

impl WireTimestamp {
    fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            WireTimestamp::Millis(ms) => DateTime::from_timestamp_millis(*ms),
            WireTimestamp::Fractional(ms) => DateTime::from_timestamp_millis(*ms as i64),
            WireTimestamp::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    timestamp: Option<WireTimestamp>,
}

/// A frame received from the stream.
///
/// `observed_at` is the local receipt time; `sent_at` is the server's own
/// timestamp when it sent one we could read.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub kind: String,
    pub payload: Value,
    pub observed_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl InboundMessage {
    /// Parses a text frame, stamping it with the current time.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Self::parse_at(text, Utc::now())
    }

    /// Parses a text frame received at `observed_at`.
    pub fn parse_at(text: &str, observed_at: DateTime<Utc>) -> Result<Self, ProtocolError> {
        if text.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::TooLarge {
                size: text.len(),
                limit: MAX_FRAME_SIZE,
            });
        }

        let frame: WireFrame = serde_json::from_str(text)?;
        Ok(Self {
            kind: frame.kind,
            payload: frame.data,
            observed_at,
            sent_at: frame.timestamp.as_ref().and_then(WireTimestamp::to_utc),
        })
    }

    /// Deserializes the payload into the given type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        Ok(T::deserialize(&self.payload)?)
    }
}

/// A frame sent to the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl OutboundMessage {
    /// Creates an outbound frame stamped with the current time.
    pub fn new<T: Serialize>(kind: impl Into<String>, data: &T) -> Result<Self, ProtocolError> {
        Ok(Self {
            kind: kind.into(),
            data: serde_json::to_value(data)?,
            timestamp: Utc::now().timestamp_millis(),
        })
    }

    /// Serializes the frame for the wire.
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
