//! Error types for the cached retrieval engine.

use thiserror::Error;

/// Result type alias for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Errors that can occur in the cached retrieval engine.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Cache maintenance or statistics error.
    #[error("cache error: {0}")]
    Cache(#[from] recall_cache::CacheError),

    /// Embedding error.
    #[error("embedding error: {0}")]
    Embedding(#[from] recall_embeddings::EmbeddingError),

    /// The external document index failed. Propagated to the caller; the
    /// result is not cached.
    #[error("document index error: {0}")]
    Index(anyhow::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<anyhow::Error> for RetrievalError {
    fn from(err: anyhow::Error) -> Self {
        Self::Index(err)
    }
}
