//! Agent personas and published agent state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{AgentId, Position, SpatialId, TimeOfDay};

/// One entry of a persona's daily plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleItem {
    /// When the activity starts.
    pub time: TimeOfDay,
    /// Activity label, e.g. `"work"`.
    pub activity: String,
    /// Where it happens; must resolve in the spatial index.
    pub location: SpatialId,
}

impl ScheduleItem {
    /// Convenience constructor.
    #[must_use]
    pub fn new(time: TimeOfDay, activity: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            time,
            activity: activity.into(),
            location: SpatialId::new(location),
        }
    }
}

/// A memory a persona starts the simulation with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedMemory {
    /// Natural language content.
    pub content: String,
    /// Importance score.
    pub importance: f64,
}

/// Immutable identity and default daily plan of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPersona {
    /// Unique id.
    pub id: AgentId,
    /// Display name.
    pub name: String,
    /// Age in years.
    pub age: u32,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Ordered personality traits.
    #[serde(default)]
    pub traits: Vec<String>,
    /// Ordered daily schedule.
    #[serde(default)]
    pub schedule: Vec<ScheduleItem>,
    /// Where the agent spawns if no position is given.
    #[serde(default)]
    pub home: Option<SpatialId>,
    /// Explicit spawn position.
    #[serde(default)]
    pub position: Option<Position>,
    /// Memories appended at world start.
    #[serde(default, rename = "seedMemories", alias = "seed_memories")]
    pub seed_memories: Vec<SeedMemory>,
}

/// Mutable per-agent state, published read-only to the world each tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    /// Agent id.
    pub id: AgentId,
    /// Current position.
    pub position: Position,
    /// What the agent is doing.
    pub current_activity: String,
    /// Where the agent is (or is heading).
    pub current_location: SpatialId,
    /// Outgoing affinity scores.
    #[serde(default)]
    pub affinity: BTreeMap<AgentId, f64>,
}
