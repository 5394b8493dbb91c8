//! Error types for trove-index.

use std::num::TryFromIntError;

use trove_llm::EmbedError;
use trove_memory::MemoryError;

/// Errors that can occur during indexing and retrieval.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Invalid settings or inputs detected before any work starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A vector whose length differs from the index dimension.
    #[error("dimension mismatch: index uses {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A single chunk exceeds the per-batch token budget.
    #[error("chunk {chunk_id} has {tokens} tokens, batch limit is {limit}")]
    ChunkTooLarge {
        chunk_id: String,
        tokens: usize,
        limit: usize,
    },

    /// Embedding provider failure that survived retries.
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedError),

    /// The run was cancelled before every chunk had a vector.
    #[error("cancelled")]
    Cancelled,

    /// Persistence failure: the store is unavailable or a write failed.
    #[error("store error: {0}")]
    Store(#[from] MemoryError),

    /// IO error reading source files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Result template with an unknown placeholder.
    #[error("invalid template: {0}")]
    Template(String),

    /// Integer conversion error.
    #[error("integer conversion failed: {0}")]
    IntConversion(#[from] TryFromIntError),
}

impl From<trove_memory::VectorStoreError> for IndexError {
    fn from(e: trove_memory::VectorStoreError) -> Self {
        Self::Store(MemoryError::VectorStore(e))
    }
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
