//! Affinity Table: directional relationship scores between agents.
//!
//! Stored as a flat `(from, to) → score` map so agents never hold references
//! to one another. Perception is asymmetric: A warming to B changes only the
//! `(A, B)` cell, never `(B, A)`.

use std::collections::BTreeMap;

use dashmap::DashMap;
use tracing::trace;

use crate::config::AffinityConfig;
use crate::error::{Result, TownError};
use crate::types::AgentId;

/// One exported affinity cell.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AffinityRecord {
    /// Whose feeling this is.
    pub from: AgentId,
    /// Towards whom.
    pub to: AgentId,
    /// Score within the configured range.
    pub score: f64,
}

/// Directed, clamped relationship scores.
#[derive(Debug)]
pub struct AffinityTable {
    scores: DashMap<(AgentId, AgentId), f64>,
    min: f64,
    max: f64,
}

impl AffinityTable {
    /// Create an empty table clamped to the configured range.
    ///
    /// # Errors
    /// [`TownError::Config`] when the range is not finite and non-empty.
    pub fn new(config: &AffinityConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            scores: DashMap::new(),
            min: config.min,
            max: config.max,
        })
    }

    /// Reject a delta that [`adjust`](Self::adjust) would refuse.
    ///
    /// # Errors
    /// [`TownError::InvalidScore`] for a non-finite delta.
    pub fn check_delta(delta: f64) -> Result<()> {
        if delta.is_finite() {
            Ok(())
        } else {
            Err(TownError::InvalidScore(delta))
        }
    }

    /// The clamp range.
    #[must_use]
    pub fn range(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    /// Score from `agent` towards `other`; 0 when never adjusted.
    #[must_use]
    pub fn get(&self, agent: &AgentId, other: &AgentId) -> f64 {
        self.scores
            .get(&(agent.clone(), other.clone()))
            .map_or(0.0, |s| *s.value())
    }

    /// Add `delta` to the `(agent, other)` score and return the clamped result.
    ///
    /// # Errors
    /// Returns [`TownError::InvalidScore`] for a non-finite delta.
    pub fn adjust(&self, agent: &AgentId, other: &AgentId, delta: f64) -> Result<f64> {
        Self::check_delta(delta)?;
        let (min, max) = (self.min, self.max);
        let mut cell = self
            .scores
            .entry((agent.clone(), other.clone()))
            .or_insert(0.0);
        let updated = (*cell + delta).clamp(min, max);
        *cell = updated;
        trace!(%agent, %other, delta, score = updated, "affinity adjusted");
        Ok(updated)
    }

    /// Every score held by `agent`, keyed by the other agent.
    #[must_use]
    pub fn row(&self, agent: &AgentId) -> BTreeMap<AgentId, f64> {
        self.scores
            .iter()
            .filter(|e| &e.key().0 == agent)
            .map(|e| (e.key().1.clone(), *e.value()))
            .collect()
    }

    /// Pull every score held by `agent` towards zero by `factor` (0 = no change, 1 = reset).
    pub fn decay_towards_neutral(&self, agent: &AgentId, factor: f64) {
        let keep = 1.0 - factor.clamp(0.0, 1.0);
        for mut entry in self.scores.iter_mut() {
            if &entry.key().0 == agent {
                *entry.value_mut() *= keep;
            }
        }
    }

    /// All cells, ordered by `(from, to)`.
    #[must_use]
    pub fn export(&self) -> Vec<AffinityRecord> {
        let mut records: Vec<AffinityRecord> = self
            .scores
            .iter()
            .map(|e| AffinityRecord {
                from: e.key().0.clone(),
                to: e.key().1.clone(),
                score: *e.value(),
            })
            .collect();
        records.sort_by(|a, b| a.from.cmp(&b.from).then_with(|| a.to.cmp(&b.to)));
        records
    }

    /// Restore cells, clamping each into range.
    ///
    /// # Errors
    /// Returns [`TownError::InvalidScore`] for a non-finite score.
    pub fn import(&self, records: impl IntoIterator<Item = AffinityRecord>) -> Result<()> {
        for record in records {
            if !record.score.is_finite() {
                return Err(TownError::InvalidScore(record.score));
            }
            self.scores
                .insert((record.from, record.to), record.score.clamp(self.min, self.max));
        }
        Ok(())
    }
}
