use thiserror::Error;

/// A fragment the reassembler refused to accept
///
/// The tracking state is unchanged whenever one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReassemblyError {
    #[error("message {message_id}: total chunk count is zero")]
    ZeroTotalChunks { message_id: String },

    #[error("message {message_id}: chunk {chunk_index} out of range for {total_chunks} chunks")]
    ChunkOutOfRange {
        message_id: String,
        chunk_index: u32,
        total_chunks: u32,
    },

    #[error("message {message_id}: expected {expected} chunks, fragment announced {actual}")]
    TotalChunksMismatch {
        message_id: String,
        expected: u32,
        actual: u32,
    },

    /// The partial document was discarded along with this fragment
    #[error("message {message_id}: document exceeds {limit} bytes")]
    DocumentTooLarge { message_id: String, limit: usize },
}

/// A reassembled payload that is not a syslog message log
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("unexpected root element <{0}>")]
    UnexpectedRoot(String),

    #[error("document has no root element")]
    MissingRoot,

    #[error("cannot decode syslog message log: {0}")]
    Decode(#[from] quick_xml::de::DeError),
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid {field} pattern: {source}")]
    InvalidPattern {
        field: &'static str,
        #[source]
        source: regex::Error,
    },
}
