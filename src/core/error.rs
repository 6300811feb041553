//! Error types for the tagging engine
//!
//! Library code returns [`Error`]; the CLI layer wraps it with `anyhow`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Insert lost a race against a concurrent writer with the same name.
    #[error("tag name already exists: {0}")]
    DuplicateTagName(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("embedding timed out after {0} ms")]
    EmbeddingTimeout(u64),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("tag index holds {stored}-d vectors but the embedder produces {configured}-d; restore the previous embedding settings or use a new data directory")]
    IndexDimension { stored: usize, configured: usize },

    #[error("corpus index error: {0}")]
    Corpus(#[from] tantivy::TantivyError),

    #[error("invalid query: {0}")]
    Query(#[from] tantivy::query::QueryParserError),

    #[error("tag index error: {0}")]
    TagIndex(String),

    #[error("tag index search timed out after {0} ms")]
    TagIndexTimeout(u64),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("unit of work already finished")]
    Finished,

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// True for failures of the tag index that resolution treats as "no match".
    pub fn is_index_degradation(&self) -> bool {
        matches!(self, Self::TagIndex(_) | Self::TagIndexTimeout(_))
    }
}
