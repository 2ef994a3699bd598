//! Cache manager: orchestrates the exact → semantic → miss read path and
//! the insert-or-reinforce write path for both entry families.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use recall_embeddings::{Embedding, EmbeddingProvider, EmbeddingRequest};

use crate::config::CacheConfig;
use crate::entry::{Document, PromptKey, QueryKey};
use crate::error::Result;
use crate::matcher;
use crate::store::{
    CacheStore, NewGeneration, NewRetrieval, StatsSnapshot, TableSummary, now_epoch,
};

/// Entries younger than this never qualify for a maintenance sweep once
/// they have been hit at least once beyond their insert.
const CLEANUP_MIN_USAGE: i64 = 2;

/// Generation entries at or above this quality survive the sweep
/// regardless of age and usage.
const CLEANUP_QUALITY_FLOOR: f64 = 0.3;

/// Window for the "recent activity" counters in [`CacheStatsReport`].
const RECENT_WINDOW_SECS: i64 = 86_400;

/// How a cached value was matched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CacheHit {
    /// Identical normalized-input hash.
    Exact,

    /// Embedding similarity at or above the configured threshold, with the
    /// matched entry's original text as provenance.
    Semantic {
        similarity: f32,
        matched_text: String,
    },
}

/// A cache hit together with its provenance.
#[derive(Debug, Clone)]
pub struct CachedResult<T> {
    /// The cached payload.
    pub value: T,

    /// Exact or semantic provenance.
    pub hit: CacheHit,

    /// Usage count of the matched entry, including this hit.
    pub usage_count: i64,
}

/// Outcome of a retrieval cache lookup.
///
/// A miss hands back the [`QueryKey`], including any embedding computed
/// during the semantic phase, so the write path never re-embeds.
#[derive(Debug)]
pub enum RetrievalLookup {
    Hit(CachedResult<Vec<Document>>),
    Miss(QueryKey),
}

/// Outcome of a generation cache lookup.
#[derive(Debug)]
pub enum GenerationLookup {
    Hit(CachedResult<String>),
    Miss(PromptKey),
}

/// Result of a maintenance sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupReport {
    pub retrieval_removed: usize,
    pub generation_removed: usize,
}

/// Aggregated cache statistics, derived from the store on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsReport {
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,

    /// `hits / max(total_requests, 1)`.
    pub hit_rate: f64,

    /// Running mean of lookup latencies, in seconds.
    pub avg_response_time: f64,

    pub retrieval: TableSummary,
    pub generation: TableSummary,
}

/// Orchestrates cache reads, writes, feedback, and maintenance.
///
/// The manager is the only component that mutates the store. Lookup methods
/// are infallible by design: every cache-internal failure is logged and
/// degrades to a miss, so a caller never fails a request because the cache
/// is unavailable.
pub struct CacheManager {
    store: CacheStore,
    embedder: Arc<dyn EmbeddingProvider>,
    config: CacheConfig,
    stats: Mutex<StatsSnapshot>,
}

impl CacheManager {
    /// Open the store at the configured path and load persisted statistics.
    pub fn open(config: CacheConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let store = CacheStore::open(&config.db_path)?;
        Self::with_store(store, embedder, config)
    }

    /// Build a manager over an existing store.
    pub fn with_store(
        store: CacheStore,
        embedder: Arc<dyn EmbeddingProvider>,
        config: CacheConfig,
    ) -> Result<Self> {
        let stats = store.load_stats()?;
        info!(
            "cache manager ready ({} prior requests, threshold {})",
            stats.total_requests, config.similarity_threshold
        );
        Ok(Self {
            store,
            embedder,
            config,
            stats: Mutex::new(stats),
        })
    }

    /// Look up cached retrieval results for a query.
    ///
    /// Tries the exact hash first, then semantic matching over a bounded
    /// candidate pool. A hit reinforces the matched entry (not the incoming
    /// query's hash). No entry is ever created on the read path.
    pub async fn lookup_retrieval(&self, query: &str) -> RetrievalLookup {
        let started = Instant::now();
        let mut key = QueryKey::new(query);

        match self.store.get_retrieval(&key.hash) {
            Ok(Some(entry)) => match entry.documents() {
                Ok(documents) => {
                    self.reinforce_retrieval_row(&key.hash);
                    self.note_outcome(true, started);
                    debug!("exact retrieval hit for '{query}'");
                    return RetrievalLookup::Hit(CachedResult {
                        value: documents,
                        hit: CacheHit::Exact,
                        usage_count: entry.usage_count + 1,
                    });
                }
                Err(err) => warn!("corrupt retrieval payload for {}: {err}", key.hash),
            },
            Ok(None) => {}
            Err(err) => {
                warn!("retrieval cache unavailable, degrading to miss: {err}");
                self.note_outcome(false, started);
                return RetrievalLookup::Miss(key);
            }
        }

        key.embedding = self.embed(&key.text).await;
        if let Some(embedding) = key.embedding.as_ref() {
            match self
                .store
                .scan_retrieval_candidates(self.config.retrieval_candidates)
            {
                Ok(candidates) => {
                    let ranked =
                        matcher::rank(embedding, candidates, self.config.similarity_threshold);
                    for scored in ranked {
                        let matched_hash = scored.candidate.query_hash.clone();
                        match scored.candidate.documents() {
                            Ok(documents) => {
                                self.reinforce_retrieval_row(&matched_hash);
                                self.note_outcome(true, started);
                                debug!(
                                    "semantic retrieval hit: '{query}' matched '{}' at {:.3}",
                                    scored.candidate.query_text, scored.score
                                );
                                return RetrievalLookup::Hit(CachedResult {
                                    value: documents,
                                    hit: CacheHit::Semantic {
                                        similarity: scored.score,
                                        matched_text: scored.candidate.query_text,
                                    },
                                    usage_count: scored.candidate.usage_count + 1,
                                });
                            }
                            Err(err) => {
                                warn!("corrupt retrieval payload for {matched_hash}: {err}");
                            }
                        }
                    }
                }
                Err(err) => warn!("candidate scan failed, degrading to miss: {err}"),
            }
        }

        self.note_outcome(false, started);
        RetrievalLookup::Miss(key)
    }

    /// Look up a cached generated artifact for a prompt + context +
    /// temperature triple.
    pub async fn lookup_generation(
        &self,
        prompt: &str,
        context: &str,
        temperature: f64,
    ) -> GenerationLookup {
        let started = Instant::now();
        let mut key = PromptKey::new(prompt, context, temperature);

        match self.store.get_generation(&key.hash) {
            Ok(Some(entry)) => {
                self.reinforce_generation_row(&key.hash);
                self.note_outcome(true, started);
                debug!("exact generation hit for '{prompt}'");
                return GenerationLookup::Hit(CachedResult {
                    value: entry.generated_artifact,
                    hit: CacheHit::Exact,
                    usage_count: entry.usage_count + 1,
                });
            }
            Ok(None) => {}
            Err(err) => {
                warn!("generation cache unavailable, degrading to miss: {err}");
                self.note_outcome(false, started);
                return GenerationLookup::Miss(key);
            }
        }

        key.embedding = self.embed(&key.text).await;
        if let Some(embedding) = key.embedding.as_ref() {
            match self
                .store
                .scan_generation_candidates(self.config.generation_candidates)
            {
                Ok(candidates) => {
                    let ranked =
                        matcher::rank(embedding, candidates, self.config.similarity_threshold);
                    if let Some(scored) = ranked.into_iter().next() {
                        self.reinforce_generation_row(&scored.candidate.prompt_hash);
                        self.note_outcome(true, started);
                        debug!(
                            "semantic generation hit: '{prompt}' matched '{}' at {:.3}",
                            scored.candidate.prompt_text, scored.score
                        );
                        return GenerationLookup::Hit(CachedResult {
                            value: scored.candidate.generated_artifact,
                            hit: CacheHit::Semantic {
                                similarity: scored.score,
                                matched_text: scored.candidate.prompt_text,
                            },
                            usage_count: scored.candidate.usage_count + 1,
                        });
                    }
                }
                Err(err) => warn!("candidate scan failed, degrading to miss: {err}"),
            }
        }

        self.note_outcome(false, started);
        GenerationLookup::Miss(key)
    }

    /// Persist a retrieval result after the upstream search completed.
    ///
    /// The only path that creates retrieval entries. Reuses the embedding
    /// carried by the key when the preceding lookup already computed one.
    /// Store failures are logged and swallowed; the caller already holds
    /// its result.
    pub async fn record_retrieval(&self, key: QueryKey, documents: &[Document], elapsed: Duration) {
        let QueryKey {
            text,
            hash,
            embedding,
        } = key;
        let embedding = match embedding {
            Some(embedding) => embedding,
            None => self.embed(&text).await.unwrap_or_default(),
        };

        let results_json = match serde_json::to_string(documents) {
            Ok(json) => json,
            Err(err) => {
                warn!("failed to serialize retrieval results, skipping cache write: {err}");
                return;
            }
        };

        let new = NewRetrieval {
            query_hash: &hash,
            query_text: &text,
            query_embedding: &embedding,
            results_json: &results_json,
            response_time: elapsed.as_secs_f64(),
        };
        match self.store.upsert_retrieval(&new) {
            Ok(usage_count) => debug!("cached retrieval result for '{text}' (usage {usage_count})"),
            Err(err) => warn!("failed to cache retrieval result: {err}"),
        }
    }

    /// Persist a generated artifact after the upstream generation completed.
    pub async fn record_generation(&self, key: PromptKey, artifact: &str, quality_score: f64) {
        let embedding = match key.embedding {
            Some(ref embedding) => embedding.clone(),
            None => self.embed(&key.text).await.unwrap_or_default(),
        };

        let new = NewGeneration {
            prompt_hash: &key.hash,
            prompt_text: &key.text,
            prompt_embedding: &embedding,
            context_hash: &key.context_hash,
            generated_artifact: artifact,
            temperature: key.temperature,
            quality_score: quality_score.clamp(0.0, 1.0),
        };
        match self.store.upsert_generation(&new) {
            Ok(usage_count) => {
                debug!("cached generation result for '{}' (usage {usage_count})", key.text);
            }
            Err(err) => warn!("failed to cache generation result: {err}"),
        }
    }

    /// Blend user feedback into a generation entry's score. Returns whether
    /// a matching entry existed.
    pub fn add_feedback(
        &self,
        prompt: &str,
        context: &str,
        temperature: f64,
        score: f64,
    ) -> Result<bool> {
        let key = PromptKey::new(prompt, context, temperature);
        let found = self.store.add_feedback(&key.hash, score.clamp(0.0, 1.0))?;
        if !found {
            debug!("feedback for unknown prompt hash {}", key.hash);
        }
        Ok(found)
    }

    /// Maintenance sweep: remove entries last used before the cutoff that
    /// are neither reused nor (for generation entries) high quality.
    /// Operator-invoked; nothing schedules this internally.
    pub fn cleanup(&self, max_age_days: u32) -> Result<CleanupReport> {
        let cutoff = now_epoch() - i64::from(max_age_days) * 86_400;
        let retrieval_removed = self
            .store
            .delete_retrieval_older_than(cutoff, CLEANUP_MIN_USAGE)?;
        let generation_removed = self.store.delete_generation_older_than(
            cutoff,
            CLEANUP_MIN_USAGE,
            CLEANUP_QUALITY_FLOOR,
        )?;
        info!(
            "cleanup removed {retrieval_removed} retrieval and {generation_removed} generation entries older than {max_age_days} day(s)"
        );
        Ok(CleanupReport {
            retrieval_removed,
            generation_removed,
        })
    }

    /// Aggregate statistics: persisted counters plus per-table summaries
    /// derived live from the store (never cached separately, to avoid
    /// drift).
    pub fn stats(&self) -> Result<CacheStatsReport> {
        let snapshot = self.stats_snapshot();
        let recent_cutoff = Utc::now().timestamp() - RECENT_WINDOW_SECS;
        let retrieval = self.store.retrieval_summary(recent_cutoff)?;
        let generation = self.store.generation_summary(recent_cutoff)?;

        let hit_rate = snapshot.hits as f64 / snapshot.total_requests.max(1) as f64;

        Ok(CacheStatsReport {
            hits: snapshot.hits,
            misses: snapshot.misses,
            total_requests: snapshot.total_requests,
            hit_rate,
            avg_response_time: snapshot.avg_response_time,
            retrieval,
            generation,
        })
    }

    /// Current in-memory counters.
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn embed(&self, text: &str) -> Option<Embedding> {
        match self.embedder.embed(EmbeddingRequest::new(text)).await {
            Ok(response) => Some(response.embedding),
            Err(err) => {
                warn!("embedding failed, semantic matching skipped: {err}");
                None
            }
        }
    }

    fn reinforce_retrieval_row(&self, hash: &str) {
        if let Err(err) = self.store.reinforce_retrieval(hash) {
            warn!("failed to reinforce retrieval entry {hash}: {err}");
        }
    }

    fn reinforce_generation_row(&self, hash: &str) {
        if let Err(err) = self.store.reinforce_generation(hash) {
            warn!("failed to reinforce generation entry {hash}: {err}");
        }
    }

    /// Fold this lookup into the counters and persist them best-effort;
    /// statistics never block or fail the primary path.
    fn note_outcome(&self, hit: bool, started: Instant) {
        let elapsed = started.elapsed().as_secs_f64();
        let snapshot = {
            let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            stats.total_requests += 1;
            if hit {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
            stats.avg_response_time +=
                (elapsed - stats.avg_response_time) / stats.total_requests as f64;
            stats.clone()
        };

        if let Err(err) = self.store.save_stats(&snapshot) {
            warn!("failed to persist cache statistics: {err}");
        }
    }
}
