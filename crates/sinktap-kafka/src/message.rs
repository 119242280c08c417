use prost::Message;
use thiserror::Error;

use sinktap_types::Envelope;

/// Sink API wire message, as published by OpenNMS minions
#[derive(Clone, PartialEq, Message)]
pub struct SinkMessage {
    #[prost(string, tag = "1")]
    pub message_id: String,

    #[prost(int32, tag = "2")]
    pub current_chunk_number: i32,

    #[prost(int32, tag = "3")]
    pub total_chunks: i32,

    #[prost(bytes = "vec", tag = "4")]
    pub content: Vec<u8>,
}

/// A record value that cannot be turned into an envelope
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("invalid sink message: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("invalid sink message: negative {field} ({value})")]
    Negative { field: &'static str, value: i32 },
}

impl SinkMessage {
    /// Decode a Kafka record value straight into an envelope
    pub fn decode_envelope(value: &[u8]) -> Result<Envelope, EnvelopeError> {
        Self::decode(value)?.try_into()
    }
}

impl TryFrom<SinkMessage> for Envelope {
    type Error = EnvelopeError;

    fn try_from(msg: SinkMessage) -> Result<Self, Self::Error> {
        let chunk_index = non_negative("chunk number", msg.current_chunk_number)?;
        let total_chunks = non_negative("total chunks", msg.total_chunks)?;

        Ok(Envelope::new(msg.message_id, chunk_index, total_chunks, msg.content))
    }
}

fn non_negative(field: &'static str, value: i32) -> Result<u32, EnvelopeError> {
    u32::try_from(value).map_err(|_| EnvelopeError::Negative { field, value })
}
