//! Error types for the semantic cache.

use thiserror::Error;

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors that can occur in the semantic cache.
///
/// These are internal to the cache layer: the read and write paths recover
/// from all of them by degrading to a miss, so they never surface to a
/// caller of the lookup API. Maintenance operations return them directly.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Underlying SQLite store error.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Embedding provider error.
    #[error("embedding error: {0}")]
    Embedding(#[from] recall_embeddings::EmbeddingError),

    /// Serialization error for a cached payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row failed to decode (bad vector blob or payload).
    #[error("corrupt cache entry: {0}")]
    CorruptEntry(String),

    /// Integer conversion overflow.
    #[error("integer conversion overflow for field: {0}")]
    Overflow(&'static str),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
