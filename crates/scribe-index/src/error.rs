//! Error types for scribe-index.

use std::num::TryFromIntError;

use scribe_llm::LlmError;
use scribe_memory::VectorStoreError;

/// Errors that can occur during indexing and retrieval.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading source files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// `SQLite` database error.
    #[error("database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// The embedding provider kept failing after all retry attempts, or
    /// failed with an error that retrying cannot fix.
    #[error("embedding provider unavailable after {attempts} attempt(s): {source}")]
    EmbeddingUnavailable {
        attempts: u32,
        #[source]
        source: LlmError,
    },

    /// The vector engine could not be reached or rejected the request.
    #[error("vector index unavailable: {0}")]
    VectorIndexUnavailable(#[from] VectorStoreError),

    /// A file referenced by the index no longer exists in the corpus.
    /// Hydration drops the entry and logs this error.
    #[error("source file missing: {0}")]
    SourceFileMissing(String),

    /// Embedding vectors in one batch disagree on dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// File watcher error.
    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// Integer conversion error.
    #[error("integer conversion failed: {0}")]
    IntConversion(#[from] TryFromIntError),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
