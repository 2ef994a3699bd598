//! Cache entry data model and content-hash keys.

use recall_embeddings::Embedding;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// A ranked document returned by the external vector index and cached as
/// part of a retrieval result payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document text.
    pub content: String,

    /// Source metadata (filename, path, etc.).
    #[serde(default)]
    pub metadata: serde_json::Value,

    /// Distance reported by the vector index.
    #[serde(default)]
    pub distance: f64,
}

/// A cached retrieval result row.
///
/// `usage_count` is monotonically non-decreasing; `avg_response_time` is a
/// weighted running mean recomputed on each reinforcement, never
/// overwritten outright.
#[derive(Debug, Clone)]
pub struct RetrievalEntry {
    /// Unique key derived from the normalized query text.
    pub query_hash: String,

    /// Original query text (provenance for semantic hits).
    pub query_text: String,

    /// Embedding of the query text.
    pub query_embedding: Embedding,

    /// Serialized ranked document list (JSON).
    pub results_json: String,

    /// Times this entry was inserted or hit.
    pub usage_count: i64,

    /// Success rate in [0, 1].
    pub success_rate: f64,

    /// Running mean of upstream response times, in seconds.
    pub avg_response_time: f64,

    /// Creation time, unix epoch seconds.
    pub created_at: i64,

    /// Last reinforcement time, unix epoch seconds.
    pub last_used: i64,
}

impl RetrievalEntry {
    /// Decode the cached document list.
    ///
    /// A decode failure means the stored payload is corrupt; the read path
    /// treats that as a miss and the next write overwrites the row.
    pub fn documents(&self) -> Result<Vec<Document>> {
        Ok(serde_json::from_str(&self.results_json)?)
    }
}

/// A cached generation result row.
///
/// `quality_score` only ever rises (reinforcement takes the max);
/// `user_feedback` is an exponentially-decaying blend favoring recent
/// feedback over history.
#[derive(Debug, Clone)]
pub struct GenerationEntry {
    /// Unique key derived from normalized prompt + context + temperature.
    pub prompt_hash: String,

    /// Original prompt text (provenance for semantic hits).
    pub prompt_text: String,

    /// Embedding of the prompt text.
    pub prompt_embedding: Embedding,

    /// Hash of the context the artifact was generated against.
    pub context_hash: String,

    /// The generated artifact, cached verbatim.
    pub generated_artifact: String,

    /// Sampling temperature used for generation.
    pub temperature: f64,

    /// Quality score in [0, 1], monotonically non-decreasing.
    pub quality_score: f64,

    /// Times this entry was inserted or hit.
    pub usage_count: i64,

    /// Blended user feedback in [0, 1].
    pub user_feedback: f64,

    /// Creation time, unix epoch seconds.
    pub created_at: i64,

    /// Last reinforcement time, unix epoch seconds.
    pub last_used: i64,
}

/// Exact-match key for a retrieval query, plus the embedding computed while
/// looking it up.
///
/// The embedding provider is never called more than once per distinct query
/// per request: a miss hands this token back to the caller, and the write
/// path reuses the embedding it carries instead of re-embedding.
#[derive(Debug, Clone)]
pub struct QueryKey {
    /// Original query text.
    pub text: String,

    /// Hash of the normalized query text.
    pub hash: String,

    /// Embedding computed during the semantic lookup phase, if any.
    pub embedding: Option<Embedding>,
}

impl QueryKey {
    /// Build the key for a query. The embedding is filled in lazily by the
    /// lookup path.
    pub fn new(query: impl Into<String>) -> Self {
        let text = query.into();
        let hash = hash_query(&text);
        Self {
            text,
            hash,
            embedding: None,
        }
    }
}

/// Exact-match key for a generation prompt, composed of normalized prompt,
/// context, and temperature.
#[derive(Debug, Clone)]
pub struct PromptKey {
    /// Original prompt text.
    pub text: String,

    /// Context the artifact is generated against.
    pub context: String,

    /// Sampling temperature.
    pub temperature: f64,

    /// Hash of the normalized prompt + context + temperature composite.
    pub hash: String,

    /// Hash of the context alone.
    pub context_hash: String,

    /// Embedding of the prompt text, if computed.
    pub embedding: Option<Embedding>,
}

impl PromptKey {
    /// Build the key for a prompt + context + temperature triple.
    pub fn new(prompt: impl Into<String>, context: impl Into<String>, temperature: f64) -> Self {
        let text = prompt.into();
        let context = context.into();
        let hash = hash_prompt(&text, &context, temperature);
        let context_hash = if context.is_empty() {
            String::new()
        } else {
            hash_query(&context)
        };
        Self {
            text,
            context,
            temperature,
            hash,
            context_hash,
            embedding: None,
        }
    }
}

/// Case-fold and trim input text before hashing, so trivially different
/// spellings of the same request share a cache key.
fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Content hash for a retrieval query.
pub fn hash_query(query: &str) -> String {
    sha256_hex(&normalize(query))
}

/// Content hash for a generation prompt composite.
pub fn hash_prompt(prompt: &str, context: &str, temperature: f64) -> String {
    sha256_hex(&format!("{}|{context}|{temperature}", normalize(prompt)))
}

fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().fold(String::with_capacity(64), |mut out, b| {
        use std::fmt::Write;
        let _ = write!(out, "{b:02x}");
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn query_hash_case_and_whitespace_insensitive() {
        assert_eq!(hash_query("Rotating Cube"), hash_query("  rotating cube  "));
        assert_ne!(hash_query("rotating cube"), hash_query("spinning cube"));
    }

    #[test]
    fn prompt_hash_includes_context_and_temperature() {
        let base = hash_prompt("make a cube", "ctx", 0.7);
        assert_ne!(base, hash_prompt("make a cube", "other", 0.7));
        assert_ne!(base, hash_prompt("make a cube", "ctx", 0.2));
        assert_eq!(base, hash_prompt("  Make a Cube ", "ctx", 0.7));
    }

    #[test]
    fn prompt_key_hashes_context_separately() {
        let key = PromptKey::new("a prompt", "some context", 0.7);
        assert_eq!(key.context_hash, hash_query("some context"));

        let empty = PromptKey::new("a prompt", "", 0.7);
        assert_eq!(empty.context_hash, "");
    }

    #[test]
    fn documents_roundtrip() {
        let docs = vec![Document {
            content: "cube geometry".to_string(),
            metadata: serde_json::json!({"filename": "cube.md"}),
            distance: 0.12,
        }];
        let entry = RetrievalEntry {
            query_hash: hash_query("q"),
            query_text: "q".to_string(),
            query_embedding: vec![1.0, 0.0],
            results_json: serde_json::to_string(&docs).unwrap(),
            usage_count: 1,
            success_rate: 1.0,
            avg_response_time: 0.0,
            created_at: 0,
            last_used: 0,
        };
        assert_eq!(entry.documents().unwrap(), docs);
    }

    #[test]
    fn corrupt_payload_is_an_error() {
        let entry = RetrievalEntry {
            query_hash: hash_query("q"),
            query_text: "q".to_string(),
            query_embedding: vec![],
            results_json: "not json".to_string(),
            usage_count: 1,
            success_rate: 1.0,
            avg_response_time: 0.0,
            created_at: 0,
            last_used: 0,
        };
        assert!(entry.documents().is_err());
    }
}
