//! Shared types for sinktap
//!
//! This crate contains data structures used across multiple sinktap crates.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Placeholder text for a line whose content cannot be decoded
pub const UNKNOWN_TEXT: &str = "[unknown]";

// ============================================================================
// Transport Types
// ============================================================================

/// One transport-level fragment of a logical document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Identity shared by every chunk of one document
    pub message_id: String,

    /// Zero-based position of this chunk
    pub chunk_index: u32,

    /// Number of chunks the document was split into
    pub total_chunks: u32,

    /// Raw bytes carried by this chunk
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(
        message_id: impl Into<String>,
        chunk_index: u32,
        total_chunks: u32,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            chunk_index,
            total_chunks,
            payload: payload.into(),
        }
    }

    /// 1-based count of chunks delivered once this one is accepted
    pub fn ordinal(&self) -> u32 {
        self.chunk_index.saturating_add(1)
    }

    /// Whether this chunk closes its document
    pub fn is_final(&self) -> bool {
        self.ordinal() == self.total_chunks
    }
}

// ============================================================================
// Document Types
// ============================================================================

/// A batch of syslog messages forwarded by one minion
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename = "syslog-message-log")]
pub struct LogDocument {
    /// Identity of the minion that received the traffic
    #[serde(rename = "@system-id", default)]
    pub agent_id: String,

    #[serde(rename = "@location", default)]
    pub location: String,

    /// Address of the device that sent the syslog traffic
    #[serde(rename = "@source-address", default)]
    pub source_address: String,

    /// Port of the sending device; an empty attribute reads as 0
    #[serde(rename = "@source-port", default, deserialize_with = "port_or_zero")]
    pub source_port: u16,

    /// Messages in the order the minion received them
    #[serde(rename = "messages", default)]
    pub lines: Vec<LogLine>,
}

fn port_or_zero<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(0);
    }
    raw.parse().map_err(serde::de::Error::custom)
}

/// A single syslog message inside a document
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct LogLine {
    /// Receive time as written by the minion
    #[serde(rename = "@timestamp", default)]
    pub timestamp: String,

    /// Base64 encoded message bytes
    #[serde(rename = "$text", default)]
    pub content: String,
}

impl LogLine {
    pub fn new(timestamp: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            content: content.into(),
        }
    }

    /// Build a line from plain text, encoding it the way minions do
    pub fn from_text(timestamp: impl Into<String>, text: &str) -> Self {
        Self::new(timestamp, STANDARD.encode(text))
    }

    /// Decode the message text
    ///
    /// Content that is not valid base64 yields [`UNKNOWN_TEXT`]. Invalid
    /// UTF-8 in the decoded bytes is replaced rather than rejected.
    pub fn text(&self) -> String {
        // Character data may be wrapped across lines
        let compact: String = self
            .content
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();

        match STANDARD.decode(compact) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => UNKNOWN_TEXT.to_string(),
        }
    }

    /// Parse the timestamp attribute, if it is RFC 3339
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self.timestamp.trim())
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }
}

// ============================================================================
// Output Types
// ============================================================================

/// A line that passed every filter, ready to be written out
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedLine {
    pub source_address: String,

    pub source_port: u16,

    #[serde(rename = "systemId")]
    pub agent_id: String,

    pub location: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(rename = "message")]
    pub text: String,
}

impl MatchedLine {
    /// Create a matched line from a document and one of its lines
    pub fn new(document: &LogDocument, line: &LogLine, text: String) -> Self {
        Self {
            source_address: document.source_address.clone(),
            source_port: document.source_port,
            agent_id: document.agent_id.clone(),
            location: document.location.clone(),
            timestamp: line.parsed_timestamp(),
            text,
        }
    }
}

impl std::fmt::Display for MatchedLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "received syslog message from {} through minion {}: {}",
            self.source_address, self.agent_id, self.text
        )
    }
}
