//! Configuration for the cached retrieval engine.

use recall_cache::CacheConfig;
use serde::{Deserialize, Serialize};

/// Configuration for the cached retrieval engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of documents a search returns when the caller does not say.
    pub default_k: usize,

    /// Seed queries for cache warm-up before first real traffic.
    pub warm_queries: Vec<String>,

    /// Cache layer configuration.
    pub cache: CacheConfig,
}

impl RetrievalConfig {
    /// Create a configuration with default values.
    pub fn new(cache: CacheConfig) -> Self {
        Self {
            default_k: 5,
            warm_queries: default_warm_queries(),
            cache,
        }
    }

    /// Set the default result count.
    pub fn with_default_k(mut self, k: usize) -> Self {
        self.default_k = k;
        self
    }

    /// Replace the warm-up seed queries.
    pub fn with_warm_queries(mut self, queries: Vec<String>) -> Self {
        self.warm_queries = queries;
        self
    }

    /// Set the cache configuration.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

/// Common scene-construction queries, used when no seed list is supplied.
fn default_warm_queries() -> Vec<String> {
    [
        "create a rotating cube",
        "sphere with lighting",
        "particle system animation",
        "vector field visualization",
        "3D graph plotting",
        "physics simulation",
        "camera controls orbit",
        "texture mapping example",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RetrievalConfig::default();
        assert_eq!(config.default_k, 5);
        assert!(!config.warm_queries.is_empty());
    }

    #[test]
    fn builder_overrides() {
        let config = RetrievalConfig::default()
            .with_default_k(3)
            .with_warm_queries(vec!["only this".to_string()]);
        assert_eq!(config.default_k, 3);
        assert_eq!(config.warm_queries, vec!["only this".to_string()]);
    }
}
