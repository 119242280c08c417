//! Log processing for sinktap
//!
//! This crate provides chunk reassembly, document parsing, and filtering.

mod error;
mod filter;
mod parser;
mod reassembler;

pub use error::{DocumentError, FilterError, ReassemblyError};
pub use filter::FilterPipeline;
pub use parser::DocumentParser;
pub use reassembler::{
    DEFAULT_MAX_AGE, DEFAULT_MAX_DOCUMENT_BYTES, DEFAULT_MAX_PENDING, Reassembler,
    ReassemblerConfig, ReassemblerStats,
};

// Re-export types used in our public API
pub use sinktap_types::{Envelope, LogDocument, LogLine, MatchedLine};
