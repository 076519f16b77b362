//! Memory entries and the per-agent [`MemoryStore`].
//!
//! Every agent owns an append-only stream of [`MemoryEntry`] values. Entries
//! are typed (observation, interaction, reflection), carry an importance score
//! and the last time they were recalled, and are never deleted: decay lowers
//! their importance and the archive moves them out of the scored set.

pub mod metadata;
pub mod store;

pub use metadata::{Metadata, MetadataValue};
pub use store::{DecayReport, MemoryStore};

use serde::{Deserialize, Serialize};

use crate::types::{AgentId, MemoryId, SimTime};

/// Kind of memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// Something the agent perceived.
    Observation,
    /// Something the agent did with another agent.
    Interaction,
    /// A higher-level thought synthesised from other memories.
    Reflection,
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Observation => write!(f, "observation"),
            Self::Interaction => write!(f, "interaction"),
            Self::Reflection => write!(f, "reflection"),
        }
    }
}

/// A stored memory.
///
/// Only `last_accessed_at`, `importance` and `decayed_through` ever change
/// after append. `created_at <= last_accessed_at` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    /// Store-assigned id, increasing with append order.
    pub id: MemoryId,
    /// Owner.
    pub agent_id: AgentId,
    /// Natural language content.
    pub content: String,
    /// When the memory was formed.
    pub created_at: SimTime,
    /// When the memory was last recalled.
    pub last_accessed_at: SimTime,
    /// Non-negative significance estimate.
    #[serde(rename = "importanceScore")]
    pub importance: f64,
    /// Memory kind.
    #[serde(rename = "type")]
    pub kind: MemoryKind,
    /// Open key-value bag; see [`metadata`] for the keys the runtime writes.
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
    /// How far importance decay has already been applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decayed_through: Option<SimTime>,
}

impl MemoryEntry {
    /// Record a recall at `now`. Never moves the access time backwards.
    pub fn record_access(&mut self, now: SimTime) {
        self.last_accessed_at = self.last_accessed_at.max(now);
    }
}

/// An append request. Missing fields are filled in by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMemory {
    /// Caller-chosen id; the store allocates one when absent.
    pub id: Option<MemoryId>,
    /// Owner.
    pub agent_id: AgentId,
    /// Natural language content.
    pub content: String,
    /// Memory kind.
    pub kind: MemoryKind,
    /// Significance estimate; must be finite and non-negative.
    pub importance: f64,
    /// Creation time; defaults to the append time.
    pub created_at: Option<SimTime>,
    /// Last access time; defaults to the creation time.
    pub last_accessed_at: Option<SimTime>,
    /// Metadata bag.
    pub metadata: Metadata,
}

impl NewMemory {
    /// A new memory with no id and no timestamps.
    #[must_use]
    pub fn new(
        agent_id: AgentId,
        kind: MemoryKind,
        content: impl Into<String>,
        importance: f64,
    ) -> Self {
        Self {
            id: None,
            agent_id,
            content: content.into(),
            kind,
            importance,
            created_at: None,
            last_accessed_at: None,
            metadata: Metadata::new(),
        }
    }

    /// Observation shorthand.
    #[must_use]
    pub fn observation(agent_id: AgentId, content: impl Into<String>, importance: f64) -> Self {
        Self::new(agent_id, MemoryKind::Observation, content, importance)
    }

    /// Pin the id.
    #[must_use]
    pub fn with_id(mut self, id: MemoryId) -> Self {
        self.id = Some(id);
        self
    }

    /// Pin the creation time.
    #[must_use]
    pub fn created_at(mut self, at: SimTime) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Pin the last access time.
    #[must_use]
    pub fn last_accessed_at(mut self, at: SimTime) -> Self {
        self.last_accessed_at = Some(at);
        self
    }

    /// Attach one metadata value.
    #[must_use]
    pub fn with_meta(mut self, key: &str, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Query used to score relevance during retrieval.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryContext {
    /// Free text describing the current situation.
    pub text: String,
}

impl QueryContext {
    /// Build a query from text.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}
