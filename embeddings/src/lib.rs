//! # Embeddings
//!
//! Embedding generation and similarity primitives for the Recall semantic
//! result cache.
//!
//! The cache layer treats embedding models as black-box collaborators with a
//! narrow contract: text in, fixed-dimension vector out, deterministic within
//! a model version. This crate provides that contract ([`EmbeddingProvider`])
//! together with the scoring primitive the cache's semantic matcher is built
//! on ([`cosine_similarity`]).
//!
//! Providers are not required to return unit vectors; callers that care
//! normalize via [`similarity::normalize`].

pub mod error;
pub mod provider;
pub mod similarity;

pub use error::{EmbeddingError, Result};
pub use provider::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse, OpenAIProvider};
pub use similarity::cosine_similarity;

/// A dense vector embedding.
pub type Embedding = Vec<f32>;

/// Dimension of embeddings (varies by model).
pub const DEFAULT_DIMENSION: usize = 1536; // OpenAI text-embedding-3-small
