use std::io::Write;
use std::time::Instant;

use anyhow::Result;

use sinktap_logs::{DocumentParser, Envelope, FilterPipeline, Reassembler};

use crate::output::LineWriter;

/// Counters for the processing loop
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TapStats {
    pub envelopes: u64,
    pub documents: u64,
    pub invalid_documents: u64,
    pub rejected_fragments: u64,
    pub lines_emitted: u64,
}

/// Runs envelopes through reassembly, decoding, filtering, and output
pub struct Tap<W: Write> {
    reassembler: Reassembler,
    filter: FilterPipeline,
    output: LineWriter<W>,
    stats: TapStats,
}

impl<W: Write> Tap<W> {
    pub fn new(reassembler: Reassembler, filter: FilterPipeline, output: LineWriter<W>) -> Self {
        Self {
            reassembler,
            filter,
            output,
            stats: TapStats::default(),
        }
    }

    /// Process one envelope to completion
    ///
    /// Returns the number of lines written. Bad fragments and undecodable
    /// documents are logged and skipped; only output failures are errors.
    pub fn process(&mut self, envelope: Envelope) -> Result<usize> {
        self.stats.envelopes += 1;
        let message_id = envelope.message_id.clone();

        let payload = match self.reassembler.accept(envelope) {
            Ok(Some(payload)) => payload,
            Ok(None) => return Ok(0),
            Err(err) => {
                self.stats.rejected_fragments += 1;
                tracing::warn!("dropping fragment: {}", err);
                return Ok(0);
            }
        };

        let document = match DocumentParser::parse(&payload) {
            Ok(document) => document,
            Err(err) => {
                self.stats.invalid_documents += 1;
                tracing::warn!(%message_id, "invalid syslog message received: {}", err);
                return Ok(0);
            }
        };
        self.stats.documents += 1;

        let matched = self.filter.evaluate(&document);
        tracing::trace!(
            %message_id,
            agent = %document.agent_id,
            lines = document.lines.len(),
            matched = matched.len(),
            "document filtered"
        );

        for line in &matched {
            self.output.write_line(line)?;
        }
        self.stats.lines_emitted += matched.len() as u64;

        Ok(matched.len())
    }

    /// Drop partial documents that have been idle too long
    pub fn evict_expired(&mut self) -> usize {
        self.reassembler.evict_expired(Instant::now())
    }

    pub fn stats(&self) -> &TapStats {
        &self.stats
    }

    pub fn reassembler(&self) -> &Reassembler {
        &self.reassembler
    }

    #[cfg(test)]
    fn into_output(self) -> W {
        self.output.into_inner()
    }
}
