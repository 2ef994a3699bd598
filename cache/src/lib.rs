//! # Recall Cache
//!
//! A two-tier semantic result cache that sits in front of expensive
//! retrieval and generation operations and serves previously computed
//! results for both exact and approximately equivalent requests.
//!
//! Exact string hashing alone under-utilizes a cache of natural-language
//! inputs: "rotating cube" and "spinning cube" should usually hit the same
//! cached artifact. The read path therefore tries an exact hash lookup
//! first and falls back to embedding-similarity matching over a bounded
//! pool of the most-reinforced entries.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                       CacheManager                         │
//! │                                                            │
//! │   lookup ──► exact hash ──► semantic rank ──► miss         │
//! │                 │                │                         │
//! │                 ▼                ▼                         │
//! │            CacheStore       SimilarityMatcher              │
//! │            (SQLite)         (cosine ≥ threshold)           │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The store exclusively owns entry lifecycle; the manager is the only
//! component that mutates it. Cache-internal failures degrade to a miss:
//! a caller never fails a request because the cache is unavailable.

pub mod config;
pub mod entry;
pub mod error;
pub mod manager;
pub mod matcher;
pub mod store;

pub use config::CacheConfig;
pub use entry::{Document, GenerationEntry, PromptKey, QueryKey, RetrievalEntry};
pub use error::{CacheError, Result};
pub use manager::{
    CacheHit, CacheManager, CacheStatsReport, CachedResult, CleanupReport, GenerationLookup,
    RetrievalLookup,
};
pub use matcher::{ScoredCandidate, SemanticCandidate};
pub use store::{CacheStore, NewGeneration, NewRetrieval, StatsSnapshot, TableSummary};
