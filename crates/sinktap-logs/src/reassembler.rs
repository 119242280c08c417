//! Chunk reassembly for Sink API messages
//!
//! Producers split large documents into chunks that share a message id.
//! Chunks are expected in non-decreasing order, which Kafka guarantees as
//! long as every chunk of a message lands on the same partition. A chunk is
//! accepted only when its ordinal (`chunk_index + 1`) is beyond the highest
//! one already seen, so redelivered chunks are dropped. The document is
//! complete when the chunk whose ordinal equals `total_chunks` arrives.
//! Only the first chunk opens a partial document; later chunks with
//! nothing to join are dropped, so a truncated document is never emitted.
//!
//! Partial documents are held in a bounded store: a cap on the number of
//! pending messages, a maximum idle age, and a maximum document size.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sinktap_types::Envelope;

use crate::error::ReassemblyError;

/// Default cap on partial documents held at once
pub const DEFAULT_MAX_PENDING: usize = 1024;

/// Default idle time before a partial document is dropped
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(300);

/// Default ceiling for a reassembled document (64 MiB)
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 64 * 1024 * 1024;

/// Limits for the partial document store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReassemblerConfig {
    /// Maximum partial documents; the least recently updated is evicted
    /// to make room for a new one
    pub max_pending: usize,

    /// Idle time after which [`Reassembler::evict_expired`] drops a partial
    /// document. Zero disables age eviction.
    pub max_age: Duration,

    /// Maximum size of a reassembled document
    pub max_document_bytes: usize,

    /// Panic on chunking contract violations instead of returning an
    /// error. Only honored in debug builds; on by default there.
    pub panic_on_violation: bool,
}

impl Default for ReassemblerConfig {
    fn default() -> Self {
        Self {
            max_pending: DEFAULT_MAX_PENDING,
            max_age: DEFAULT_MAX_AGE,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
            panic_on_violation: cfg!(debug_assertions),
        }
    }
}

/// Counters describing what the reassembler has done so far
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReassemblerStats {
    pub fragments_received: u64,
    pub documents_completed: u64,
    /// Chunks at or below the highest ordinal already seen
    pub duplicates_dropped: u64,
    /// Later chunks of multi-chunk messages with nothing buffered
    pub orphans_dropped: u64,
    /// Accepted chunks that skipped at least one ordinal
    pub gaps: u64,
    /// Chunks refused for violating the chunking contract
    pub rejected: u64,
    pub evicted_expired: u64,
    pub evicted_overflow: u64,
    pub evicted_oversize: u64,
    /// Partial documents currently held
    pub pending: usize,
}

/// Progress of one multi-chunk message
#[derive(Debug)]
struct PartialDocument {
    accumulated: Vec<u8>,
    highest_chunk_seen: u32,
    total_chunks: u32,
    last_update: Instant,
}

/// Rebuilds complete documents from chunked envelopes
///
/// Owned by a single consumer; every call runs to completion before the
/// next one starts.
#[derive(Debug)]
pub struct Reassembler {
    config: ReassemblerConfig,
    pending: HashMap<String, PartialDocument>,
    stats: ReassemblerStats,
}

impl Reassembler {
    pub fn new(config: ReassemblerConfig) -> Self {
        Self {
            config,
            pending: HashMap::new(),
            stats: ReassemblerStats::default(),
        }
    }

    /// Feed one envelope, returning the complete document once its last
    /// chunk arrives
    pub fn accept(&mut self, envelope: Envelope) -> Result<Option<Vec<u8>>, ReassemblyError> {
        self.accept_at(envelope, Instant::now())
    }

    /// Same as [`accept`](Self::accept) with an explicit clock reading
    pub fn accept_at(
        &mut self,
        envelope: Envelope,
        now: Instant,
    ) -> Result<Option<Vec<u8>>, ReassemblyError> {
        self.stats.fragments_received += 1;

        if let Err(err) = self.validate(&envelope) {
            debug_assert!(!self.config.panic_on_violation, "{}", err);
            self.stats.rejected += 1;
            return Err(err);
        }

        let ordinal = envelope.ordinal();
        let is_final = envelope.is_final();
        let Envelope {
            message_id,
            total_chunks,
            payload,
            ..
        } = envelope;

        if total_chunks == 1 {
            self.stats.documents_completed += 1;
            return Ok(Some(payload));
        }

        if is_final {
            return self.complete(message_id, ordinal, payload);
        }

        let Some(record) = self.pending.get_mut(&message_id) else {
            return self.open(message_id, ordinal, total_chunks, payload, now);
        };

        if ordinal <= record.highest_chunk_seen {
            self.stats.duplicates_dropped += 1;
            tracing::trace!(%message_id, ordinal, "dropping redelivered chunk");
            return Ok(None);
        }

        if record.accumulated.len() + payload.len() > self.config.max_document_bytes {
            self.pending.remove(&message_id);
            return Err(self.oversize(message_id));
        }

        if ordinal > record.highest_chunk_seen + 1 {
            self.stats.gaps += 1;
            tracing::warn!(
                %message_id,
                expected = record.highest_chunk_seen + 1,
                ordinal,
                "chunk gap, document will be incomplete"
            );
        }
        record.accumulated.extend_from_slice(&payload);
        record.highest_chunk_seen = ordinal;
        record.last_update = now;

        Ok(None)
    }

    /// Drop partial documents idle for longer than the configured age
    ///
    /// Returns how many were dropped.
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let max_age = self.config.max_age;
        if max_age.is_zero() {
            return 0;
        }

        let before = self.pending.len();
        self.pending.retain(|message_id, record| {
            let keep = now.saturating_duration_since(record.last_update) < max_age;
            if !keep {
                tracing::debug!(
                    %message_id,
                    received = record.highest_chunk_seen,
                    total = record.total_chunks,
                    "evicting stale partial document"
                );
            }
            keep
        });

        let evicted = before - self.pending.len();
        self.stats.evicted_expired += evicted as u64;
        evicted
    }

    /// Get statistics
    pub fn stats(&self) -> ReassemblerStats {
        let mut stats = self.stats.clone();
        stats.pending = self.pending.len();
        stats
    }

    /// Number of partial documents held
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether a partial document is held for this message
    pub fn is_pending(&self, message_id: &str) -> bool {
        self.pending.contains_key(message_id)
    }

    /// Highest ordinal accepted so far for a pending message
    pub fn highest_chunk_seen(&self, message_id: &str) -> Option<u32> {
        self.pending.get(message_id).map(|r| r.highest_chunk_seen)
    }

    /// Bytes buffered so far for a pending message
    pub fn buffered_bytes(&self, message_id: &str) -> Option<&[u8]> {
        self.pending.get(message_id).map(|r| r.accumulated.as_slice())
    }

    /// Drop every partial document
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    fn validate(&self, envelope: &Envelope) -> Result<(), ReassemblyError> {
        if envelope.total_chunks == 0 {
            return Err(ReassemblyError::ZeroTotalChunks {
                message_id: envelope.message_id.clone(),
            });
        }

        if envelope.chunk_index >= envelope.total_chunks {
            return Err(ReassemblyError::ChunkOutOfRange {
                message_id: envelope.message_id.clone(),
                chunk_index: envelope.chunk_index,
                total_chunks: envelope.total_chunks,
            });
        }

        if let Some(record) = self.pending.get(&envelope.message_id) {
            if record.total_chunks != envelope.total_chunks {
                return Err(ReassemblyError::TotalChunksMismatch {
                    message_id: envelope.message_id.clone(),
                    expected: record.total_chunks,
                    actual: envelope.total_chunks,
                });
            }
        }

        Ok(())
    }

    /// Start tracking a message; only its first chunk may do so
    fn open(
        &mut self,
        message_id: String,
        ordinal: u32,
        total_chunks: u32,
        payload: Vec<u8>,
        now: Instant,
    ) -> Result<Option<Vec<u8>>, ReassemblyError> {
        if ordinal > 1 {
            // Earlier chunks were never seen, evicted, or dropped for size
            self.stats.orphans_dropped += 1;
            tracing::debug!(%message_id, ordinal, "chunk without earlier chunks, dropping");
            return Ok(None);
        }

        if payload.len() > self.config.max_document_bytes {
            return Err(self.oversize(message_id));
        }

        while self.pending.len() >= self.config.max_pending.max(1) {
            self.evict_least_recent();
        }

        self.pending.insert(
            message_id,
            PartialDocument {
                accumulated: payload,
                highest_chunk_seen: ordinal,
                total_chunks,
                last_update: now,
            },
        );

        Ok(None)
    }

    fn complete(
        &mut self,
        message_id: String,
        ordinal: u32,
        payload: Vec<u8>,
    ) -> Result<Option<Vec<u8>>, ReassemblyError> {
        let Some(mut record) = self.pending.remove(&message_id) else {
            self.stats.orphans_dropped += 1;
            tracing::debug!(%message_id, "final chunk without earlier chunks, dropping");
            return Ok(None);
        };

        if record.accumulated.len() + payload.len() > self.config.max_document_bytes {
            return Err(self.oversize(message_id));
        }

        if ordinal > record.highest_chunk_seen + 1 {
            self.stats.gaps += 1;
            tracing::warn!(
                %message_id,
                expected = record.highest_chunk_seen + 1,
                ordinal,
                "chunk gap, document will be incomplete"
            );
        }

        record.accumulated.extend_from_slice(&payload);
        self.stats.documents_completed += 1;
        Ok(Some(record.accumulated))
    }

    fn oversize(&mut self, message_id: String) -> ReassemblyError {
        self.stats.evicted_oversize += 1;
        ReassemblyError::DocumentTooLarge {
            message_id,
            limit: self.config.max_document_bytes,
        }
    }

    /// Evict the least recently updated partial document
    fn evict_least_recent(&mut self) {
        let oldest = self
            .pending
            .iter()
            .min_by_key(|(_, r)| r.last_update)
            .map(|(id, _)| id.clone());

        if let Some(message_id) = oldest {
            self.pending.remove(&message_id);
            self.stats.evicted_overflow += 1;
            tracing::debug!(%message_id, "pending limit reached, evicting partial document");
        }
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(ReassemblerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, index: u32, total: u32, payload: &str) -> Envelope {
        Envelope::new(id, index, total, payload.as_bytes().to_vec())
    }

    /// Violations come back as errors, even in debug builds
    fn lenient() -> Reassembler {
        Reassembler::new(ReassemblerConfig {
            panic_on_violation: false,
            ..Default::default()
        })
    }

    #[test]
    fn test_single_chunk_completes_immediately() {
        let mut reassembler = Reassembler::default();
        let out = reassembler.accept(chunk("A", 0, 1, "whole")).unwrap();

        assert_eq!(out.as_deref(), Some(&b"whole"[..]));
        assert_eq!(reassembler.pending_count(), 0);
        assert!(!reassembler.is_pending("A"));
    }

    #[test]
    fn test_two_chunks() {
        let mut reassembler = Reassembler::default();

        assert_eq!(reassembler.accept(chunk("A", 0, 2, "ab")).unwrap(), None);
        assert!(reassembler.is_pending("A"));

        let out = reassembler.accept(chunk("A", 1, 2, "cd")).unwrap();
        assert_eq!(out, Some(b"abcd".to_vec()));
        assert!(!reassembler.is_pending("A"));
    }

    #[test]
    fn test_many_chunks_in_order() {
        let mut reassembler = Reassembler::default();
        let parts = ["<a", " b=", "\"1\"", "/>"];

        for (i, part) in parts.iter().enumerate().take(parts.len() - 1) {
            let out = reassembler.accept(chunk("M", i as u32, 4, part)).unwrap();
            assert_eq!(out, None);
            assert_eq!(reassembler.highest_chunk_seen("M"), Some(i as u32 + 1));
        }

        let out = reassembler.accept(chunk("M", 3, 4, parts[3])).unwrap();
        assert_eq!(out, Some(b"<a b=\"1\"/>".to_vec()));
        assert_eq!(reassembler.pending_count(), 0);
        assert_eq!(reassembler.stats().documents_completed, 1);
    }

    #[test]
    fn test_redelivered_chunk_is_noop() {
        let mut reassembler = Reassembler::default();
        reassembler.accept(chunk("A", 0, 3, "ab")).unwrap();
        reassembler.accept(chunk("A", 1, 3, "cd")).unwrap();

        assert_eq!(reassembler.accept(chunk("A", 1, 3, "XX")).unwrap(), None);
        assert_eq!(reassembler.accept(chunk("A", 0, 3, "YY")).unwrap(), None);

        assert_eq!(reassembler.buffered_bytes("A"), Some(&b"abcd"[..]));
        assert_eq!(reassembler.highest_chunk_seen("A"), Some(2));
        assert_eq!(reassembler.stats().duplicates_dropped, 2);

        let out = reassembler.accept(chunk("A", 2, 3, "ef")).unwrap();
        assert_eq!(out, Some(b"abcdef".to_vec()));
    }

    #[test]
    fn test_interleaved_messages() {
        let mut reassembler = Reassembler::default();
        reassembler.accept(chunk("A", 0, 2, "a1")).unwrap();
        reassembler.accept(chunk("B", 0, 2, "b1")).unwrap();
        assert_eq!(reassembler.pending_count(), 2);

        let b = reassembler.accept(chunk("B", 1, 2, "b2")).unwrap();
        let a = reassembler.accept(chunk("A", 1, 2, "a2")).unwrap();
        assert_eq!(a, Some(b"a1a2".to_vec()));
        assert_eq!(b, Some(b"b1b2".to_vec()));
        assert_eq!(reassembler.pending_count(), 0);
    }

    #[test]
    fn test_final_chunk_after_completion_is_dropped() {
        let mut reassembler = Reassembler::default();
        reassembler.accept(chunk("A", 0, 2, "ab")).unwrap();
        reassembler.accept(chunk("A", 1, 2, "cd")).unwrap();

        assert_eq!(reassembler.accept(chunk("A", 1, 2, "cd")).unwrap(), None);
        assert_eq!(reassembler.stats().orphans_dropped, 1);
        assert_eq!(reassembler.pending_count(), 0);
    }

    #[test]
    fn test_gap_is_counted_but_accepted() {
        let mut reassembler = Reassembler::default();
        reassembler.accept(chunk("A", 0, 3, "ab")).unwrap();

        let out = reassembler.accept(chunk("A", 2, 3, "ef")).unwrap();
        assert_eq!(out, Some(b"abef".to_vec()));
        assert_eq!(reassembler.stats().gaps, 1);
    }

    #[test]
    fn test_contract_violations_leave_state_untouched() {
        let mut reassembler = lenient();
        reassembler.accept(chunk("A", 0, 3, "ab")).unwrap();

        let err = reassembler.accept(chunk("A", 3, 3, "zz")).unwrap_err();
        assert!(matches!(err, ReassemblyError::ChunkOutOfRange { chunk_index: 3, .. }));

        let err = reassembler.accept(chunk("A", 1, 4, "zz")).unwrap_err();
        assert_eq!(
            err,
            ReassemblyError::TotalChunksMismatch {
                message_id: "A".to_string(),
                expected: 3,
                actual: 4,
            }
        );

        let err = reassembler.accept(chunk("Z", 0, 0, "zz")).unwrap_err();
        assert!(matches!(err, ReassemblyError::ZeroTotalChunks { .. }));

        assert_eq!(reassembler.buffered_bytes("A"), Some(&b"ab"[..]));
        assert_eq!(reassembler.highest_chunk_seen("A"), Some(1));
        assert!(!reassembler.is_pending("Z"));
        assert_eq!(reassembler.stats().rejected, 3);
    }

    #[test]
    fn test_pending_limit_evicts_least_recent() {
        let config = ReassemblerConfig {
            max_pending: 2,
            ..Default::default()
        };
        let mut reassembler = Reassembler::new(config);
        let t0 = Instant::now();

        reassembler.accept_at(chunk("A", 0, 3, "a"), t0).unwrap();
        reassembler.accept_at(chunk("B", 0, 3, "b"), t0 + Duration::from_secs(1)).unwrap();
        // Touch A so B becomes the least recently updated
        reassembler.accept_at(chunk("A", 1, 3, "a"), t0 + Duration::from_secs(2)).unwrap();
        reassembler.accept_at(chunk("C", 0, 3, "c"), t0 + Duration::from_secs(3)).unwrap();

        assert!(reassembler.is_pending("A"));
        assert!(!reassembler.is_pending("B"));
        assert!(reassembler.is_pending("C"));
        assert_eq!(reassembler.stats().evicted_overflow, 1);
    }

    #[test]
    fn test_evict_expired() {
        let config = ReassemblerConfig {
            max_age: Duration::from_secs(60),
            ..Default::default()
        };
        let mut reassembler = Reassembler::new(config);
        let t0 = Instant::now();

        reassembler.accept_at(chunk("old", 0, 2, "x"), t0).unwrap();
        reassembler.accept_at(chunk("new", 0, 2, "y"), t0 + Duration::from_secs(50)).unwrap();

        assert_eq!(reassembler.evict_expired(t0 + Duration::from_secs(30)), 0);
        assert_eq!(reassembler.evict_expired(t0 + Duration::from_secs(61)), 1);
        assert!(!reassembler.is_pending("old"));
        assert!(reassembler.is_pending("new"));

        let stats = reassembler.stats();
        assert_eq!(stats.evicted_expired, 1);
        assert_eq!(stats.pending, 1);
    }

    #[test]
    fn test_zero_max_age_disables_expiry() {
        let config = ReassemblerConfig {
            max_age: Duration::ZERO,
            ..Default::default()
        };
        let mut reassembler = Reassembler::new(config);
        let t0 = Instant::now();

        reassembler.accept_at(chunk("A", 0, 2, "x"), t0).unwrap();
        assert_eq!(reassembler.evict_expired(t0 + Duration::from_secs(3600)), 0);
        assert!(reassembler.is_pending("A"));
    }

    #[test]
    fn test_oversize_document_is_dropped() {
        let config = ReassemblerConfig {
            max_document_bytes: 4,
            ..Default::default()
        };
        let mut reassembler = Reassembler::new(config);

        reassembler.accept(chunk("A", 0, 3, "abc")).unwrap();
        let err = reassembler.accept(chunk("A", 1, 3, "de")).unwrap_err();
        assert!(matches!(err, ReassemblyError::DocumentTooLarge { limit: 4, .. }));
        assert!(!reassembler.is_pending("A"));

        let err = reassembler.accept(chunk("B", 0, 2, "toolong")).unwrap_err();
        assert!(matches!(err, ReassemblyError::DocumentTooLarge { .. }));
        assert!(!reassembler.is_pending("B"));

        assert_eq!(reassembler.stats().evicted_oversize, 2);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "out of range")]
    fn test_violation_panics_in_debug_builds() {
        let mut reassembler = Reassembler::default();
        let _ = reassembler.accept(chunk("A", 2, 2, "zz"));
    }

    #[test]
    fn test_joining_mid_message_emits_nothing() {
        let mut reassembler = Reassembler::default();

        // Chunk 0 went by before the tap started
        assert_eq!(reassembler.accept(chunk("A", 1, 4, "bb")).unwrap(), None);
        assert_eq!(reassembler.accept(chunk("A", 2, 4, "cc")).unwrap(), None);
        assert_eq!(reassembler.accept(chunk("A", 3, 4, "dd")).unwrap(), None);

        assert!(!reassembler.is_pending("A"));
        let stats = reassembler.stats();
        assert_eq!(stats.orphans_dropped, 3);
        assert_eq!(stats.documents_completed, 0);

        // The next message is picked up from its first chunk
        reassembler.accept(chunk("B", 0, 2, "ab")).unwrap();
        assert_eq!(reassembler.accept(chunk("B", 1, 2, "cd")).unwrap(), Some(b"abcd".to_vec()));
    }

    #[test]
    fn test_oversize_document_rest_is_discarded() {
        let config = ReassemblerConfig {
            max_document_bytes: 4,
            ..Default::default()
        };
        let mut reassembler = Reassembler::new(config);

        reassembler.accept(chunk("A", 0, 4, "aaa")).unwrap();
        let err = reassembler.accept(chunk("A", 1, 4, "bb")).unwrap_err();
        assert!(matches!(err, ReassemblyError::DocumentTooLarge { .. }));

        assert_eq!(reassembler.accept(chunk("A", 2, 4, "c")).unwrap(), None);
        assert_eq!(reassembler.accept(chunk("A", 3, 4, "d")).unwrap(), None);
        assert!(!reassembler.is_pending("A"));
        assert_eq!(reassembler.stats().documents_completed, 0);
        assert_eq!(reassembler.stats().orphans_dropped, 2);
    }

    #[test]
    fn test_evicted_document_rest_is_discarded() {
        let config = ReassemblerConfig {
            max_pending: 1,
            ..Default::default()
        };
        let mut reassembler = Reassembler::new(config);
        let t0 = Instant::now();

        reassembler.accept_at(chunk("A", 0, 3, "a1"), t0).unwrap();
        // B pushes A out of the store
        reassembler.accept_at(chunk("B", 0, 2, "b1"), t0 + Duration::from_secs(1)).unwrap();
        assert!(!reassembler.is_pending("A"));

        assert_eq!(reassembler.accept(chunk("A", 1, 3, "a2")).unwrap(), None);
        assert_eq!(reassembler.accept(chunk("A", 2, 3, "a3")).unwrap(), None);
        assert_eq!(reassembler.stats().orphans_dropped, 2);
        assert!(reassembler.is_pending("B"));
    }

    #[test]
    fn test_clear() {
        let mut reassembler = Reassembler::default();
        reassembler.accept(chunk("A", 0, 2, "x")).unwrap();
        reassembler.accept(chunk("B", 0, 2, "y")).unwrap();
        reassembler.clear();
        assert_eq!(reassembler.pending_count(), 0);
    }
}
