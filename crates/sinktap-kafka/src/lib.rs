//! Kafka client for sinktap
//!
//! This crate reads OpenNMS Sink API messages from a Kafka topic and turns
//! them into envelopes for reassembly.

mod client;
mod message;
mod stream;

pub use client::KafkaClient;
pub use message::{EnvelopeError, SinkMessage};
pub use stream::{SinkStreamManager, StartOffset};

// Re-export types that are used in our public API
pub use sinktap_types::Envelope;
