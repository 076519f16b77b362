//! Read-only world snapshots for presentation layers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use township_core::persona::AgentState;
use township_core::types::{AgentId, SimTime};

/// Everything a renderer needs after a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    /// Ticks completed.
    pub tick: u64,
    /// Current simulated time.
    pub time: SimTime,
    /// Published state of every agent, failed ones included.
    pub agents: BTreeMap<AgentId, AgentState>,
    /// Failure reason per failed agent.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failed: BTreeMap<AgentId, String>,
}

impl WorldSnapshot {
    /// Agents that are still being simulated.
    pub fn live_agents(&self) -> impl Iterator<Item = &AgentId> {
        self.agents.keys().filter(|id| !self.failed.contains_key(*id))
    }
}
