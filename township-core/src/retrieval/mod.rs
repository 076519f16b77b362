//! Memory Retrieval: weighted recency/importance/relevance ranking.
//!
//! Score = w₁·Recency + w₂·Importance + w₃·Relevance
//!
//! Ranking is a total order: score descending, then raw importance
//! descending, then memory id ascending. The same inputs always produce the
//! same ranking.

pub mod relevance;
pub mod scoring;

use std::cmp::Ordering;
use std::sync::Arc;

use crate::config::{DecayConfig, RetrievalConfig, RetrievalWeights};
use crate::memory::{MemoryEntry, QueryContext};
use crate::types::{RetrievalScore, SimTime};

pub use relevance::{HashedEmbedding, LexicalOverlap, RelevanceScorer};

/// A scored retrieval result.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    /// The retrieved memory.
    pub memory: MemoryEntry,
    /// Combined retrieval score.
    pub score: RetrievalScore,
    /// Per-factor breakdown (useful for debugging).
    pub breakdown: ScoreBreakdown,
}

/// Breakdown of a retrieval score into its weighted factors.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreBreakdown {
    /// Weighted recency contribution.
    pub recency: f64,
    /// Weighted importance contribution.
    pub importance: f64,
    /// Weighted relevance contribution.
    pub relevance: f64,
}

impl ScoreBreakdown {
    /// Sum of all contributions.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.recency + self.importance + self.relevance
    }
}

/// Ranks memories for a query.
#[derive(Debug, Clone)]
pub struct RetrievalEngine {
    weights: RetrievalWeights,
    lambda: f64,
    scorer: Arc<dyn RelevanceScorer>,
}

impl RetrievalEngine {
    /// Create an engine from configuration.
    #[must_use]
    pub fn new(retrieval: &RetrievalConfig, decay: &DecayConfig) -> Self {
        Self {
            weights: retrieval.weights,
            lambda: decay.lambda(),
            scorer: Arc::from(relevance::from_config(retrieval)),
        }
    }

    /// Create an engine with an explicit relevance strategy.
    #[must_use]
    pub fn with_scorer(
        weights: RetrievalWeights,
        half_life_hours: f64,
        scorer: Arc<dyn RelevanceScorer>,
    ) -> Self {
        Self {
            weights,
            lambda: std::f64::consts::LN_2 / half_life_hours,
            scorer,
        }
    }

    /// The configured weights.
    #[must_use]
    pub fn weights(&self) -> &RetrievalWeights {
        &self.weights
    }

    /// Score one memory.
    #[must_use]
    pub fn score(
        &self,
        memory: &MemoryEntry,
        query: &QueryContext,
        now: SimTime,
        max_importance: f64,
    ) -> RetrievalResult {
        let breakdown = scoring::compute_breakdown(
            memory,
            &query.text,
            now,
            max_importance,
            self.lambda,
            &self.weights,
            self.scorer.as_ref(),
        );
        RetrievalResult {
            memory: memory.clone(),
            score: RetrievalScore::new(breakdown.total()),
            breakdown,
        }
    }

    /// Score every memory and keep the best `k`, most relevant first.
    pub fn rank<'a>(
        &self,
        memories: impl IntoIterator<Item = &'a MemoryEntry>,
        query: &QueryContext,
        now: SimTime,
        max_importance: f64,
        k: usize,
    ) -> Vec<RetrievalResult> {
        if k == 0 {
            return Vec::new();
        }
        let mut results: Vec<RetrievalResult> = memories
            .into_iter()
            .map(|m| self.score(m, query, now, max_importance))
            .collect();
        results.sort_by(rank_order);
        results.truncate(k);
        results
    }
}

/// Score desc, then importance desc, then id asc.
fn rank_order(a: &RetrievalResult, b: &RetrievalResult) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.memory.importance.total_cmp(&a.memory.importance))
        .then_with(|| a.memory.id.cmp(&b.memory.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryKind, Metadata};
    use crate::types::MemoryId;

    fn entry(id: u64, content: &str, importance: f64, accessed: u64) -> MemoryEntry {
        MemoryEntry {
            id: MemoryId(id),
            agent_id: "A1".into(),
            content: content.to_string(),
            created_at: SimTime(0),
            last_accessed_at: SimTime(accessed),
            importance,
            kind: MemoryKind::Observation,
            metadata: Metadata::new(),
            decayed_through: None,
        }
    }

    fn engine(weights: RetrievalWeights) -> RetrievalEngine {
        RetrievalEngine::with_scorer(weights, 24.0, Arc::new(LexicalOverlap))
    }

    #[test]
    fn zero_k_returns_nothing() {
        let e = engine(RetrievalWeights::default());
        let memories = [entry(1, "x", 1.0, 0)];
        assert!(e.rank(&memories, &QueryContext::new("x"), SimTime(0), 1.0, 0).is_empty());
    }

    #[test]
    fn relevance_only_prefers_matching_content() {
        let e = engine(RetrievalWeights {
            recency: 0.0,
            importance: 0.0,
            relevance: 1.0,
        });
        let memories = [
            entry(1, "fixed the tractor on the farm", 1.0, 0),
            entry(2, "had espresso at the cafe", 1.0, 0),
        ];
        let ranked = e.rank(&memories, &QueryContext::new("cafe espresso"), SimTime(0), 1.0, 2);
        assert_eq!(ranked[0].memory.id, MemoryId(2));
    }

    #[test]
    fn recency_only_prefers_recent_access() {
        let e = engine(RetrievalWeights {
            recency: 1.0,
            importance: 0.0,
            relevance: 0.0,
        });
        let memories = [entry(1, "old", 1.0, 0), entry(2, "new", 1.0, 7_200)];
        let ranked = e.rank(&memories, &QueryContext::default(), SimTime(10_000), 1.0, 1);
        assert_eq!(ranked[0].memory.id, MemoryId(2));
    }

    #[test]
    fn ties_break_on_importance_then_id() {
        // Recency-only weights make every score equal at the same access time.
        let e = engine(RetrievalWeights {
            recency: 1.0,
            importance: 0.0,
            relevance: 0.0,
        });
        let memories = [entry(3, "c", 2.0, 0), entry(2, "b", 5.0, 0), entry(1, "a", 2.0, 0)];
        let ranked = e.rank(&memories, &QueryContext::default(), SimTime(0), 5.0, 3);
        let ids: Vec<u64> = ranked.iter().map(|r| r.memory.id.0).collect();
        assert_eq!(ids, vec![2, 1, 3]);
    }

    #[test]
    fn breakdown_sums_to_score() {
        let e = engine(RetrievalWeights::default());
        let r = e.score(&entry(1, "cafe", 4.0, 0), &QueryContext::new("cafe"), SimTime(3_600), 8.0);
        assert!((r.score.value() - r.breakdown.total()).abs() < 1e-12);
        assert!((r.breakdown.importance - 0.3 * 0.5).abs() < 1e-12);
        assert!((r.breakdown.relevance - 0.4).abs() < 1e-12);
    }
}
