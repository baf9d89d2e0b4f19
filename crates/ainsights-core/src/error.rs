//! Error taxonomy for the retrieval pipeline.

use thiserror::Error;

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by chunking, indexing, persistence, and generation.
#[derive(Debug, Error)]
pub enum Error {
    /// The document is empty or its bytes cannot be read as text.
    /// Ingestion of that document is aborted; other documents are unaffected.
    #[error("cannot chunk document '{document_id}': {reason}")]
    Chunking { document_id: String, reason: String },

    /// A vector's dimension differs from the index's configured dimension.
    /// The index must be rebuilt with the current embedding model.
    #[error("embedding dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A persisted index cannot be loaded into this configuration.
    #[error("incompatible index at {path}: {reason} (run `ainsights rebuild`)")]
    IncompatibleIndex { path: String, reason: String },

    /// The answer backend did not respond within the timeout on every attempt.
    #[error("answer generation timed out after {attempts} attempt(s) of {timeout_ms} ms")]
    GenerationTimeout { attempts: u32, timeout_ms: u64 },

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn chunking(document_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Chunking {
            document_id: document_id.into(),
            reason: reason.into(),
        }
    }

    pub fn incompatible(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IncompatibleIndex {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error leaves the index instance unusable until rebuilt.
    pub fn requires_rebuild(&self) -> bool {
        matches!(
            self,
            Error::DimensionMismatch { .. } | Error::IncompatibleIndex { .. }
        )
    }
}
