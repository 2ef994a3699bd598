//! End-to-end cached search flow against a stub document index.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use recall_cache::CacheConfig;
use recall_embeddings::Embedding;
use recall_embeddings::EmbeddingError;
use recall_embeddings::EmbeddingProvider;
use recall_embeddings::EmbeddingRequest;
use recall_embeddings::EmbeddingResponse;
use recall_retrieval::CachedRetrieval;
use recall_retrieval::Document;
use recall_retrieval::Provenance;
use recall_retrieval::RetrievalConfig;

/// Embedder with fixed 2-d vectors: "spinning cube" sits at cosine 0.9 to
/// "rotating cube", "particle explosion" is orthogonal to it.
struct SceneEmbedder {
    calls: AtomicUsize,
}

impl SceneEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for SceneEmbedder {
    fn name(&self) -> &str {
        "scene"
    }

    fn default_model(&self) -> &str {
        "scene-2d"
    }

    fn default_dimension(&self) -> usize {
        2
    }

    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> Result<EmbeddingResponse, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let embedding: Embedding = match request.text.as_str() {
            "rotating cube" => vec![1.0, 0.0],
            "spinning cube" => vec![0.9, 0.435_889_9],
            "particle explosion" => vec![0.0, 1.0],
            other => panic!("unexpected embed request: {other}"),
        };
        Ok(EmbeddingResponse {
            dimension: embedding.len(),
            embedding,
            model: "scene-2d".to_string(),
            tokens_used: None,
        })
    }

    fn is_available(&self) -> bool {
        true
    }
}

struct CountingIndex {
    calls: AtomicUsize,
}

impl CountingIndex {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl recall_retrieval::DocumentIndex for CountingIndex {
    async fn query(&self, text: &str, k: usize) -> anyhow::Result<Vec<Document>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((0..k)
            .map(|i| Document {
                content: format!("doc for '{text}' #{i}"),
                metadata: serde_json::json!({ "source": "stub" }),
                distance: 0.1 * i as f64,
            })
            .collect())
    }
}

fn scene_engine(
    dir: &tempfile::TempDir,
) -> (CachedRetrieval, Arc<CountingIndex>, Arc<SceneEmbedder>) {
    let index = Arc::new(CountingIndex::new());
    let embedder = Arc::new(SceneEmbedder::new());
    let cache = CacheConfig::new(dir.path().join("recall.db"));
    let config = RetrievalConfig::new(cache).with_warm_queries(Vec::new());
    let engine = CachedRetrieval::new(config, index.clone(), embedder.clone())
        .expect("engine should open");
    (engine, index, embedder)
}

#[tokio::test]
async fn exact_then_semantic_then_miss() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (engine, index, _embedder) = scene_engine(&dir);

    // First search misses and populates the cache.
    let first = engine.search("rotating cube", 3).await.expect("search");
    assert_eq!(first.provenance, Provenance::Miss);
    assert_eq!(first.documents.len(), 3);
    assert_eq!(index.calls.load(Ordering::SeqCst), 1);

    // Identical query (modulo case and whitespace) is an exact hit.
    let exact = engine.search("  Rotating Cube ", 3).await.expect("search");
    assert_eq!(exact.provenance, Provenance::Exact);
    assert_eq!(exact.documents, first.documents);
    assert_eq!(index.calls.load(Ordering::SeqCst), 1);

    // A paraphrase above the similarity threshold reuses the same results.
    let semantic = engine.search("spinning cube", 3).await.expect("search");
    match &semantic.provenance {
        Provenance::Semantic {
            similarity,
            matched_query,
        } => {
            assert!(*similarity >= 0.85, "similarity was {similarity}");
            assert_eq!(matched_query, "rotating cube");
        }
        other => panic!("expected semantic hit, got {other:?}"),
    }
    assert_eq!(semantic.documents, first.documents);
    assert_eq!(index.calls.load(Ordering::SeqCst), 1);

    // An unrelated query falls through to the index.
    let miss = engine
        .search("particle explosion", 3)
        .await
        .expect("search");
    assert_eq!(miss.provenance, Provenance::Miss);
    assert_eq!(index.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn miss_embeds_at_most_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (engine, _index, embedder) = scene_engine(&dir);

    // The embedding computed during the semantic phase of the lookup is
    // reused by the write path.
    engine.search("rotating cube", 3).await.expect("search");
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cache_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");

    {
        let (engine, _index, _embedder) = scene_engine(&dir);
        engine.search("rotating cube", 3).await.expect("search");
    }

    let (engine, index, _embedder) = scene_engine(&dir);
    let hit = engine.search("rotating cube", 3).await.expect("search");
    assert_eq!(hit.provenance, Provenance::Exact);
    assert_eq!(index.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn warm_cache_then_stats() {
    let dir = tempfile::tempdir().expect("tempdir");
    let index = Arc::new(CountingIndex::new());
    let embedder = Arc::new(SceneEmbedder::new());
    let cache = CacheConfig::new(dir.path().join("recall.db"));
    let config = RetrievalConfig::new(cache)
        .with_warm_queries(vec!["rotating cube".to_string()]);
    let engine =
        CachedRetrieval::new(config, index.clone(), embedder).expect("engine should open");

    assert_eq!(engine.warm_cache(&[]).await, 1);
    assert_eq!(index.calls.load(Ordering::SeqCst), 1);

    engine.search("rotating cube", 5).await.expect("search");

    let perf = engine.performance_stats();
    assert_eq!(perf.cached_requests, 1);
    assert_eq!(perf.uncached_requests, 1);

    let stats = engine.cache_stats().expect("stats");
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.retrieval.entries, 1);
}
