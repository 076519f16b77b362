//! Per-factor scoring functions for memory retrieval.
//!
//! Score = w₁·Recency(m) + w₂·Importance(m) + w₃·Relevance(m)
//!
//! Where:
//!   Recency(m)    = exp(-λ · hours since last access), λ = ln 2 / half-life
//!   Importance(m) = min(importance / agent's historical max importance, 1)
//!   Relevance(m)  = strategy-defined similarity in [0, 1]

use crate::config::RetrievalWeights;
use crate::memory::MemoryEntry;
use crate::retrieval::ScoreBreakdown;
use crate::retrieval::relevance::RelevanceScorer;
use crate::types::SimTime;

/// Compute the weighted breakdown for a single memory.
#[must_use]
pub fn compute_breakdown(
    memory: &MemoryEntry,
    query: &str,
    now: SimTime,
    max_importance: f64,
    lambda: f64,
    weights: &RetrievalWeights,
    scorer: &dyn RelevanceScorer,
) -> ScoreBreakdown {
    ScoreBreakdown {
        recency: weights.recency * recency_factor(memory.last_accessed_at, now, lambda),
        importance: weights.importance * normalize_importance(memory.importance, max_importance),
        relevance: weights.relevance * scorer.score(&memory.content, query).clamp(0.0, 1.0),
    }
}

/// Exponential recency decay: 1.0 at access time, 0.5 after one half-life.
#[must_use]
pub fn recency_factor(last_accessed_at: SimTime, now: SimTime, lambda: f64) -> f64 {
    (-lambda * now.hours_since(last_accessed_at)).exp()
}

/// Importance divided by the agent's historical maximum, clamped to 1.0.
///
/// An agent whose memories all have zero importance normalizes to 0.
#[must_use]
pub fn normalize_importance(importance: f64, max_importance: f64) -> f64 {
    if max_importance <= 0.0 {
        return 0.0;
    }
    (importance / max_importance).clamp(0.0, 1.0)
}
