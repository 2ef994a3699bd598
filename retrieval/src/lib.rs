//! # Cached Retrieval Engine
//!
//! The caller-facing component of Recall: wraps an external vector document
//! index behind the semantic cache and exposes a single
//! `search(query, k)` contract to upstream callers.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                     CachedRetrieval                        │
//! │                                                            │
//! │  search(query, k)                                          │
//! │       │                                                    │
//! │       ▼                                                    │
//! │  CacheManager ── hit ──► truncate to k, return             │
//! │       │                                                    │
//! │      miss                                                  │
//! │       │                                                    │
//! │       ▼                                                    │
//! │  DocumentIndex ──► time the call ──► record_retrieval      │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Cache-internal failures never surface here; only document index errors
//! propagate to the caller, and a failed index call is never cached.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use recall_retrieval::{CachedRetrieval, RetrievalConfig};
//!
//! let engine = CachedRetrieval::new(
//!     RetrievalConfig::default(),
//!     index,
//!     embedder,
//! )?;
//!
//! let response = engine.search("rotating cube", 5).await?;
//! println!("{:?} in {:?}", response.provenance, response.elapsed);
//! ```

pub mod config;
pub mod engine;
pub mod error;

pub use config::RetrievalConfig;
pub use engine::{CachedRetrieval, DocumentIndex, PerformanceStats, Provenance, SearchResponse};
pub use error::{Result, RetrievalError};

// Re-export from dependencies for convenience
pub use recall_cache::{CacheConfig, CacheStatsReport, CleanupReport, Document};
pub use recall_embeddings::EmbeddingProvider;
