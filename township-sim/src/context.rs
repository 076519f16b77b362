//! The explicitly owned world context shared by every runtime.
//!
//! Runtimes read it concurrently during the decide phase; only the world's
//! commit phase writes to it.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use township_core::affinity::AffinityTable;
use township_core::config::TownConfig;
use township_core::memory::MemoryStore;
use township_core::persona::{AgentPersona, AgentState};
use township_core::schedule::ScheduleEngine;
use township_core::spatial::SpatialIndex;
use township_core::types::AgentId;

use crate::policy::DecisionPolicy;

/// Shared components of one world.
#[derive(Debug)]
pub struct WorldContext {
    pub(crate) config: TownConfig,
    pub(crate) personas: BTreeMap<AgentId, Arc<AgentPersona>>,
    pub(crate) spatial: RwLock<SpatialIndex>,
    pub(crate) memory: MemoryStore,
    pub(crate) affinity: AffinityTable,
    pub(crate) schedule: ScheduleEngine,
    pub(crate) states: RwLock<BTreeMap<AgentId, AgentState>>,
    pub(crate) policy: Arc<dyn DecisionPolicy>,
}

impl WorldContext {
    /// Configuration the world was built with.
    #[must_use]
    pub fn config(&self) -> &TownConfig {
        &self.config
    }

    /// Persona of `agent`.
    #[must_use]
    pub fn persona(&self, agent: &AgentId) -> Option<&Arc<AgentPersona>> {
        self.personas.get(agent)
    }

    /// The location forest and agent positions.
    #[must_use]
    pub fn spatial(&self) -> &RwLock<SpatialIndex> {
        &self.spatial
    }

    /// Every agent's memory stream.
    #[must_use]
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// Directed relationship scores.
    #[must_use]
    pub fn affinity(&self) -> &AffinityTable {
        &self.affinity
    }

    /// Planned activities and overrides.
    #[must_use]
    pub fn schedule(&self) -> &ScheduleEngine {
        &self.schedule
    }

    /// Active decision policy.
    #[must_use]
    pub fn policy(&self) -> &Arc<dyn DecisionPolicy> {
        &self.policy
    }

    /// Last published state of `agent`.
    #[must_use]
    pub fn state(&self, agent: &AgentId) -> Option<AgentState> {
        self.states.read().get(agent).cloned()
    }

    /// Last published state of every agent.
    #[must_use]
    pub fn states(&self) -> BTreeMap<AgentId, AgentState> {
        self.states.read().clone()
    }
}
