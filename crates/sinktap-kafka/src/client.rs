use std::sync::Arc;

use anyhow::{Context, Result};
use rskafka::client::partition::{PartitionClient, UnknownTopicHandling};
use rskafka::client::{Client, ClientBuilder};

/// Kafka client wrapper
pub struct KafkaClient {
    client: Client,
}

impl KafkaClient {
    /// Connect to the cluster through the given bootstrap servers
    pub async fn connect(bootstrap_servers: Vec<String>) -> Result<Self> {
        anyhow::ensure!(
            !bootstrap_servers.is_empty(),
            "At least one Kafka bootstrap server is required"
        );

        let client = ClientBuilder::new(bootstrap_servers.clone())
            .build()
            .await
            .context(format!(
                "Failed to connect to Kafka at {}",
                bootstrap_servers.join(",")
            ))?;

        Ok(Self { client })
    }

    /// List the partitions of a topic, sorted
    pub async fn partitions(&self, topic: &str) -> Result<Vec<i32>> {
        let topics = self
            .client
            .list_topics()
            .await
            .context("Failed to fetch cluster metadata")?;

        let topic_meta = topics
            .into_iter()
            .find(|t| t.name == topic)
            .with_context(|| format!("Topic '{}' not found", topic))?;

        Ok(topic_meta.partitions.into_iter().collect())
    }

    /// Create a client bound to a single partition
    pub async fn partition_client(&self, topic: &str, partition: i32) -> Result<Arc<PartitionClient>> {
        let client = self
            .client
            .partition_client(topic.to_string(), partition, UnknownTopicHandling::Retry)
            .await
            .context(format!(
                "Failed to create client for {}/{}",
                topic, partition
            ))?;

        Ok(Arc::new(client))
    }
}
