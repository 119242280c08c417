//! Config file support
//!
//! Every setting has a default matching the stock OpenNMS setup, so the
//! file is optional and may contain only the sections that differ.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use sinktap_kafka::StartOffset;
use sinktap_logs::{
    DEFAULT_MAX_AGE, DEFAULT_MAX_DOCUMENT_BYTES, DEFAULT_MAX_PENDING, ReassemblerConfig,
};

use crate::output::OutputFormat;

/// Topic OpenNMS uses for syslog messages through the Sink API
pub const DEFAULT_TOPIC: &str = "OpenNMS.Sink.Syslog";

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TapConfig {
    pub kafka: KafkaConfig,
    pub filter: FilterConfig,
    pub reassembly: ReassemblyConfig,
    pub output: OutputConfig,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KafkaConfig {
    pub bootstrap_servers: Vec<String>,
    pub topic: String,
    pub start_offset: StartOffset,
    /// Envelopes buffered between the partition readers and the tap
    pub channel_capacity: usize,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: vec!["localhost:9092".to_string()],
            topic: DEFAULT_TOPIC.to_string(),
            start_offset: StartOffset::Latest,
            channel_capacity: 1024,
        }
    }
}

/// Match values; empty strings disable the corresponding filter
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    /// Minion id the messages must come through
    pub minion: String,
    /// Regex for the syslog producer's address
    pub source: String,
    /// Regex for the message text
    pub message: String,
    pub ignore_case: bool,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReassemblyConfig {
    pub max_pending: usize,
    pub max_age_secs: u64,
    pub max_document_bytes: usize,
    pub eviction_interval_secs: u64,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            max_pending: DEFAULT_MAX_PENDING,
            max_age_secs: DEFAULT_MAX_AGE.as_secs(),
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
            eviction_interval_secs: 30,
        }
    }
}

impl ReassemblyConfig {
    pub fn to_reassembler_config(&self) -> ReassemblerConfig {
        ReassemblerConfig {
            max_pending: self.max_pending,
            max_age: Duration::from_secs(self.max_age_secs),
            max_document_bytes: self.max_document_bytes,
            ..ReassemblerConfig::default()
        }
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub format: OutputFormat,
}

impl TapConfig {
    /// Load the config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reject settings the tap cannot run with
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.kafka.bootstrap_servers.iter().any(|s| !s.is_empty()),
            "At least one Kafka bootstrap server is required"
        );
        anyhow::ensure!(!self.kafka.topic.is_empty(), "Kafka topic must not be empty");
        anyhow::ensure!(
            self.kafka.channel_capacity > 0,
            "kafka.channel_capacity must be greater than zero"
        );
        anyhow::ensure!(
            self.reassembly.eviction_interval_secs > 0,
            "reassembly.eviction_interval_secs must be greater than zero"
        );
        Ok(())
    }
}
