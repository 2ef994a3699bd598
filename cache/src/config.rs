//! Configuration for the semantic cache.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the cache manager and its persistent store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Path of the SQLite database file.
    pub db_path: PathBuf,

    /// Minimum cosine similarity for a semantic hit.
    ///
    /// The single most important tuning knob: too low serves the wrong
    /// cached artifact, too high degrades the cache to exact-match-only.
    pub similarity_threshold: f32,

    /// Candidate pool size for semantic matching over retrieval entries.
    pub retrieval_candidates: usize,

    /// Candidate pool size for semantic matching over generation entries.
    pub generation_candidates: usize,
}

impl CacheConfig {
    /// Create a configuration with default tuning for the given database path.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            similarity_threshold: 0.85,
            retrieval_candidates: 50,
            generation_candidates: 30,
        }
    }

    /// Set the similarity threshold.
    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Set the retrieval candidate pool size.
    pub fn with_retrieval_candidates(mut self, limit: usize) -> Self {
        self.retrieval_candidates = limit;
        self
    }

    /// Set the generation candidate pool size.
    pub fn with_generation_candidates(mut self, limit: usize) -> Self {
        self.generation_candidates = limit;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new("cache/recall.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.similarity_threshold, 0.85);
        assert_eq!(config.retrieval_candidates, 50);
        assert_eq!(config.generation_candidates, 30);
    }

    #[test]
    fn builder_overrides() {
        let config = CacheConfig::new("/tmp/test.db")
            .with_similarity_threshold(0.9)
            .with_retrieval_candidates(10)
            .with_generation_candidates(5);
        assert_eq!(config.similarity_threshold, 0.9);
        assert_eq!(config.retrieval_candidates, 10);
        assert_eq!(config.generation_candidates, 5);
    }
}
