use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use parking_lot::RwLock;
use rskafka::client::consumer::StreamConsumerBuilder;
use rskafka::client::partition::PartitionClient;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use sinktap_types::Envelope;

use crate::client::KafkaClient;
use crate::message::SinkMessage;

/// How long a fetch may wait on the broker for new records
const MAX_WAIT_MS: i32 = 500;

/// Pause after a failed fetch before polling again
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Where each partition starts reading
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartOffset {
    /// Only records produced after startup
    #[default]
    Latest,
    /// Everything still retained by the broker
    Earliest,
}

impl From<StartOffset> for rskafka::client::consumer::StartOffset {
    fn from(start: StartOffset) -> Self {
        match start {
            StartOffset::Latest => Self::Latest,
            StartOffset::Earliest => Self::Earliest,
        }
    }
}

/// Turn one record value into an envelope, logging and skipping bad ones
fn envelope_from_record(partition: i32, offset: i64, value: Option<Vec<u8>>) -> Option<Envelope> {
    let Some(value) = value else {
        tracing::warn!(partition, offset, "skipping record without a value");
        return None;
    };

    match SinkMessage::decode_envelope(&value) {
        Ok(envelope) => Some(envelope),
        Err(err) => {
            tracing::warn!(partition, offset, "{}", err);
            None
        }
    }
}

/// Manages envelope streaming from every partition of a topic
pub struct SinkStreamManager {
    /// Cancellation token for stopping streams
    cancel: CancellationToken,

    /// Active stream task handles
    tasks: Vec<tokio::task::JoinHandle<()>>,

    /// Last offset seen per partition
    offsets: Arc<RwLock<HashMap<i32, i64>>>,
}

impl SinkStreamManager {
    /// Create a new stream manager
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            offsets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start streaming envelopes from all partitions of the topic
    ///
    /// Envelopes of one partition are sent in offset order. Returns the
    /// number of partitions being consumed.
    pub async fn start(
        &mut self,
        client: &KafkaClient,
        topic: &str,
        start: StartOffset,
        envelope_tx: mpsc::Sender<Envelope>,
    ) -> Result<usize> {
        let partitions = client.partitions(topic).await?;

        for &partition in &partitions {
            let partition_client = client.partition_client(topic, partition).await?;
            let task = self.spawn_partition_stream(
                partition_client,
                partition,
                start,
                envelope_tx.clone(),
            );
            self.tasks.push(task);
        }

        tracing::info!(topic, partitions = partitions.len(), ?start, "consuming sink topic");
        Ok(partitions.len())
    }

    fn spawn_partition_stream(
        &self,
        partition_client: Arc<PartitionClient>,
        partition: i32,
        start: StartOffset,
        envelope_tx: mpsc::Sender<Envelope>,
    ) -> tokio::task::JoinHandle<()> {
        let cancel = self.cancel.clone();
        let offsets = Arc::clone(&self.offsets);

        tokio::spawn(async move {
            let mut stream = Box::pin(
                StreamConsumerBuilder::new(partition_client, start.into())
                    .with_max_wait_ms(MAX_WAIT_MS)
                    .build(),
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,

                    next = stream.next() => {
                        match next {
                            Some(Ok((record, _high_watermark))) => {
                                let offset = record.offset;
                                offsets.write().insert(partition, offset);

                                let Some(envelope) =
                                    envelope_from_record(partition, offset, record.record.value)
                                else {
                                    continue;
                                };

                                if envelope_tx.send(envelope).await.is_err() {
                                    // Receiver gone, stop streaming
                                    break;
                                }
                            }
                            Some(Err(err)) => {
                                tracing::warn!(partition, error = %err, "fetch failed, retrying");
                                tokio::time::sleep(RETRY_DELAY).await;
                            }
                            None => {
                                tracing::debug!(partition, "partition stream ended");
                                break;
                            }
                        }
                    }
                }
            }
        })
    }

    /// Snapshot of the last offset seen per partition, sorted by partition
    pub fn offsets(&self) -> Vec<(i32, i64)> {
        let mut offsets: Vec<_> = self.offsets.read().iter().map(|(p, o)| (*p, *o)).collect();
        offsets.sort_unstable();
        offsets
    }

    /// Stop all streams
    pub fn stop(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        // Create a fresh cancellation token for future streams
        self.cancel = CancellationToken::new();
    }

    /// Get the number of active streams
    pub fn active_count(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_finished()).count()
    }
}

impl Default for SinkStreamManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SinkStreamManager {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_offset_conversion() {
        assert_eq!(StartOffset::default(), StartOffset::Latest);
        assert!(matches!(
            rskafka::client::consumer::StartOffset::from(StartOffset::Earliest),
            rskafka::client::consumer::StartOffset::Earliest
        ));
    }

    fn sink_message(chunk: i32, total: i32) -> Vec<u8> {
        use prost::Message;

        SinkMessage {
            message_id: "m-1".to_string(),
            current_chunk_number: chunk,
            total_chunks: total,
            content: b"<syslog".to_vec(),
        }
        .encode_to_vec()
    }

    #[test]
    fn test_envelope_from_record() {
        let envelope = envelope_from_record(0, 10, Some(sink_message(1, 2))).unwrap();
        assert_eq!(envelope, Envelope::new("m-1", 1, 2, b"<syslog".to_vec()));
    }

    #[test]
    fn test_bad_records_are_skipped() {
        assert!(envelope_from_record(0, 11, None).is_none());
        // Field 1 declared as a 100 byte string with nothing behind it
        assert!(envelope_from_record(0, 12, Some(vec![0x0a, 0x64])).is_none());
        assert!(envelope_from_record(0, 13, Some(sink_message(0, -1))).is_none());

        // Records after the bad ones still come through
        assert!(envelope_from_record(0, 14, Some(sink_message(0, 1))).is_some());
    }

    #[test]
    fn test_offsets_snapshot_sorted() {
        let manager = SinkStreamManager::new();
        {
            let mut offsets = manager.offsets.write();
            offsets.insert(2, 40);
            offsets.insert(0, 7);
            offsets.insert(1, 12);
        }
        assert_eq!(manager.offsets(), vec![(0, 7), (1, 12), (2, 40)]);
        assert_eq!(manager.active_count(), 0);
    }
}
