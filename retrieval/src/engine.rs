//! Cached retrieval engine.
//!
//! [`CachedRetrieval`] wraps an external [`DocumentIndex`] behind the
//! semantic cache. Hits are served from the cache and truncated to the
//! requested `k`; misses fall through to the index, and the fetched
//! documents are recorded so the next similar query hits.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use recall_cache::CacheConfig;
use recall_cache::CacheHit;
use recall_cache::CacheManager;
use recall_cache::CacheStatsReport;
use recall_cache::CleanupReport;
use recall_cache::Document;
use recall_cache::RetrievalLookup;
use recall_embeddings::EmbeddingProvider;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;
use tracing::warn;

use crate::config::RetrievalConfig;
use crate::error::Result;

/// An external vector document index.
///
/// Implementations perform the actual (expensive) similarity search over the
/// document corpus. The engine only calls this on a cache miss.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Fetch the top `k` documents for a query.
    async fn query(&self, text: &str, k: usize) -> anyhow::Result<Vec<Document>>;
}

/// Where a search response came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Provenance {
    /// Exact cache hit on the normalized query hash.
    Exact,

    /// Semantic cache hit against a previously cached query.
    Semantic {
        similarity: f32,
        matched_query: String,
    },

    /// Cache miss; the documents were fetched from the index.
    Miss,
}

/// A search result with provenance and timing.
#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub documents: Vec<Document>,
    pub provenance: Provenance,

    /// End-to-end latency of this search, including any index call.
    pub elapsed: Duration,
}

/// Session-level latency accounting, independent of the persisted cache
/// statistics.
#[derive(Debug, Clone, Copy, Default)]
struct SessionMetrics {
    cached_requests: u64,
    uncached_requests: u64,
    cached_time: Duration,
    uncached_time: Duration,
}

/// Session performance summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub cached_requests: u64,
    pub uncached_requests: u64,

    /// `cached / max(total, 1)` for this session.
    pub hit_rate: f64,

    /// Mean latency of cache-served searches, in seconds.
    pub avg_cached_time: f64,

    /// Mean latency of index-served searches, in seconds.
    pub avg_uncached_time: f64,

    /// `avg_uncached_time / avg_cached_time`; 0.0 until both sides have
    /// at least one sample.
    pub speedup_factor: f64,
}

/// Retrieval engine with a semantic cache in front of the document index.
pub struct CachedRetrieval {
    index: Arc<dyn DocumentIndex>,
    cache: CacheManager,
    config: RetrievalConfig,
    metrics: Mutex<SessionMetrics>,
}

impl CachedRetrieval {
    /// Open the cache at the configured path and wrap the given index.
    pub fn new(
        config: RetrievalConfig,
        index: Arc<dyn DocumentIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let cache = CacheManager::open(config.cache.clone(), embedder)?;
        Ok(Self::with_manager(config, index, cache))
    }

    /// Wrap an index with an already constructed cache manager.
    pub fn with_manager(
        config: RetrievalConfig,
        index: Arc<dyn DocumentIndex>,
        cache: CacheManager,
    ) -> Self {
        Self {
            index,
            cache,
            config,
            metrics: Mutex::new(SessionMetrics::default()),
        }
    }

    /// Search for documents matching `query`, consulting the cache first.
    ///
    /// On a hit the cached documents are truncated to `k`. On a miss the
    /// index is queried; index errors propagate to the caller and nothing
    /// is cached for the failed query.
    pub async fn search(&self, query: &str, k: usize) -> Result<SearchResponse> {
        let started = Instant::now();

        match self.cache.lookup_retrieval(query).await {
            RetrievalLookup::Hit(hit) => {
                let mut documents = hit.value;
                documents.truncate(k);
                let elapsed = started.elapsed();
                self.note(true, elapsed);
                Ok(SearchResponse {
                    documents,
                    provenance: hit.hit.into(),
                    elapsed,
                })
            }
            RetrievalLookup::Miss(key) => {
                let fetch_started = Instant::now();
                let documents = self.index.query(query, k).await?;
                let fetch_elapsed = fetch_started.elapsed();

                self.cache
                    .record_retrieval(key, &documents, fetch_elapsed)
                    .await;

                let elapsed = started.elapsed();
                self.note(false, elapsed);
                Ok(SearchResponse {
                    documents,
                    provenance: Provenance::Miss,
                    elapsed,
                })
            }
        }
    }

    /// Search with the configured default result count.
    pub async fn search_default(&self, query: &str) -> Result<SearchResponse> {
        self.search(query, self.config.default_k).await
    }

    /// Pre-populate the cache by running `search` over a seed list.
    ///
    /// When `queries` is empty the configured warm-up list is used. Failures
    /// are logged and skipped; the return value is the number of queries
    /// that completed.
    pub async fn warm_cache(&self, queries: &[String]) -> usize {
        let seeds: Vec<String> = if queries.is_empty() {
            self.config.warm_queries.clone()
        } else {
            queries.to_vec()
        };

        let mut warmed = 0;
        for query in &seeds {
            match self.search(query, self.config.default_k).await {
                Ok(response) => {
                    warmed += 1;
                    info!(
                        "warmed \"{query}\" ({} documents, {:?})",
                        response.documents.len(),
                        response.provenance
                    );
                }
                Err(err) => {
                    warn!("warm-up query \"{query}\" failed: {err}");
                }
            }
        }
        warmed
    }

    /// Session hit rate and latency comparison.
    pub fn performance_stats(&self) -> PerformanceStats {
        let metrics = *self.metrics();
        let total = metrics.cached_requests + metrics.uncached_requests;

        let avg_cached_time = mean_secs(metrics.cached_time, metrics.cached_requests);
        let avg_uncached_time = mean_secs(metrics.uncached_time, metrics.uncached_requests);
        let speedup_factor = if avg_cached_time > 0.0 && avg_uncached_time > 0.0 {
            avg_uncached_time / avg_cached_time
        } else {
            0.0
        };

        PerformanceStats {
            cached_requests: metrics.cached_requests,
            uncached_requests: metrics.uncached_requests,
            hit_rate: metrics.cached_requests as f64 / total.max(1) as f64,
            avg_cached_time,
            avg_uncached_time,
            speedup_factor,
        }
    }

    /// Persisted cache statistics.
    pub fn cache_stats(&self) -> Result<CacheStatsReport> {
        Ok(self.cache.stats()?)
    }

    /// Remove stale low-value cache entries.
    pub fn cleanup(&self, max_age_days: u32) -> Result<CleanupReport> {
        Ok(self.cache.cleanup(max_age_days)?)
    }

    /// The cache configuration this engine was built with.
    pub fn cache_config(&self) -> &CacheConfig {
        &self.config.cache
    }

    fn note(&self, cached: bool, elapsed: Duration) {
        let mut metrics = self.metrics();
        if cached {
            metrics.cached_requests += 1;
            metrics.cached_time += elapsed;
        } else {
            metrics.uncached_requests += 1;
            metrics.uncached_time += elapsed;
        }
    }

    fn metrics(&self) -> std::sync::MutexGuard<'_, SessionMetrics> {
        self.metrics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl From<CacheHit> for Provenance {
    fn from(hit: CacheHit) -> Self {
        match hit {
            CacheHit::Exact => Provenance::Exact,
            CacheHit::Semantic {
                similarity,
                matched_text,
            } => Provenance::Semantic {
                similarity,
                matched_query: matched_text,
            },
        }
    }
}

fn mean_secs(total: Duration, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total.as_secs_f64() / count as f64
    }
}
