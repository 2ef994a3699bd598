//! Semantic similarity matching over candidate cache entries.

use ordered_float::OrderedFloat;
use recall_embeddings::cosine_similarity;
use tracing::debug;

use crate::entry::{GenerationEntry, RetrievalEntry};

/// A cache entry that can be scored against a query embedding.
pub trait SemanticCandidate {
    /// Stored embedding to score against.
    fn embedding(&self) -> &[f32];

    /// Reinforcement count, first tie-break.
    fn usage_count(&self) -> i64;

    /// Recency, second tie-break.
    fn last_used(&self) -> i64;
}

impl SemanticCandidate for RetrievalEntry {
    fn embedding(&self) -> &[f32] {
        &self.query_embedding
    }

    fn usage_count(&self) -> i64 {
        self.usage_count
    }

    fn last_used(&self) -> i64 {
        self.last_used
    }
}

impl SemanticCandidate for GenerationEntry {
    fn embedding(&self) -> &[f32] {
        &self.prompt_embedding
    }

    fn usage_count(&self) -> i64 {
        self.usage_count
    }

    fn last_used(&self) -> i64 {
        self.last_used
    }
}

/// A candidate that cleared the similarity threshold.
#[derive(Debug, Clone)]
pub struct ScoredCandidate<T> {
    /// Cosine similarity against the query, in [-1, 1].
    pub score: f32,

    /// The matched entry.
    pub candidate: T,
}

/// Score candidates against a query embedding and rank the ones at or above
/// the threshold.
///
/// Results sort by score descending; equal scores prefer the candidate with
/// the higher usage count, then the most recent `last_used`. Candidates
/// whose stored vector does not match the query dimension are skipped.
pub fn rank<T: SemanticCandidate>(
    query: &[f32],
    candidates: Vec<T>,
    threshold: f32,
) -> Vec<ScoredCandidate<T>> {
    let mut scored: Vec<ScoredCandidate<T>> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let score = cosine_similarity(query, candidate.embedding()).ok()?;
            if score >= threshold {
                Some(ScoredCandidate { score, candidate })
            } else {
                None
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        OrderedFloat(b.score)
            .cmp(&OrderedFloat(a.score))
            .then_with(|| b.candidate.usage_count().cmp(&a.candidate.usage_count()))
            .then_with(|| b.candidate.last_used().cmp(&a.candidate.last_used()))
    });

    debug!(
        "ranked {} candidate(s) at or above threshold {threshold}",
        scored.len()
    );
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Fake {
        id: &'static str,
        embedding: Vec<f32>,
        usage_count: i64,
        last_used: i64,
    }

    impl SemanticCandidate for Fake {
        fn embedding(&self) -> &[f32] {
            &self.embedding
        }

        fn usage_count(&self) -> i64 {
            self.usage_count
        }

        fn last_used(&self) -> i64 {
            self.last_used
        }
    }

    fn fake(id: &'static str, embedding: Vec<f32>) -> Fake {
        Fake {
            id,
            embedding,
            usage_count: 1,
            last_used: 0,
        }
    }

    #[test]
    fn ranks_by_score_descending() {
        let ranked = rank(
            &[1.0, 0.0],
            vec![
                fake("orthogonal", vec![0.0, 1.0]),
                fake("identical", vec![1.0, 0.0]),
                fake("close", vec![0.9, 0.435_889_9]),
            ],
            0.5,
        );

        let ids: Vec<&str> = ranked.iter().map(|s| s.candidate.id).collect();
        assert_eq!(ids, vec!["identical", "close"]);
        assert!(ranked[0].score > ranked[1].score);
    }

    #[test]
    fn threshold_excludes_weak_matches() {
        let ranked = rank(&[1.0, 0.0], vec![fake("weak", vec![0.2, 0.979_795_9])], 0.85);
        assert!(ranked.is_empty());
    }

    #[test]
    fn equal_scores_prefer_usage_then_recency() {
        let mut heavy = fake("heavy", vec![1.0, 0.0]);
        heavy.usage_count = 5;
        let mut recent = fake("recent", vec![1.0, 0.0]);
        recent.last_used = 100;
        let plain = fake("plain", vec![1.0, 0.0]);

        let ranked = rank(&[1.0, 0.0], vec![plain, recent, heavy], 0.85);
        let ids: Vec<&str> = ranked.iter().map(|s| s.candidate.id).collect();
        assert_eq!(ids, vec!["heavy", "recent", "plain"]);
    }

    #[test]
    fn dimension_mismatch_is_skipped() {
        let ranked = rank(
            &[1.0, 0.0],
            vec![fake("bad", vec![1.0]), fake("good", vec![1.0, 0.0])],
            0.5,
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].candidate.id, "good");
    }
}
