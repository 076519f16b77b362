//! Agent Runtime: one agent's per-tick state machine.
//!
//! ```text
//!   Idle ──begin_tick──▶ Perceiving ──stage──▶ Deciding ──take_staged──▶ Acting ──finish──▶ Idle
//!     ▲                      │                    │                                          │
//!     └──────discard─────────┴────────────────────┘                                          │
//!                                                   fail (from any state) ──▶ Failed (terminal)
//! ```
//!
//! [`AgentRuntime::decide`] is the whole Perceiving/Deciding computation: it
//! reads the shared [`WorldContext`] and returns a [`Decision`] describing
//! every write the Acting phase will make. The world commits decisions one
//! runtime at a time once every runtime has decided.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use township_core::config::ReflectionConfig;
use township_core::error::Result;
use township_core::memory::{MemoryKind, NewMemory, QueryContext, metadata};
use township_core::persona::{AgentPersona, AgentState};
use township_core::schedule::ScheduleOverride;
use township_core::types::{AgentId, MemoryId, SimTime, SpatialId};

use crate::context::WorldContext;
use crate::policy::{Choice, PerceivedAgent, Perception, PolicyInput};

/// Importance of an arrival memory.
pub const ARRIVAL_IMPORTANCE: f64 = 2.0;
/// Importance of noticing another agent.
pub const OBSERVATION_IMPORTANCE: f64 = 3.0;
/// Base importance of an interaction; strong feelings add up to 3 more.
pub const INTERACTION_IMPORTANCE: f64 = 5.0;

/// Where a runtime is in its tick cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentPhase {
    /// Waiting for the next tick.
    Idle,
    /// Decide task dispatched.
    Perceiving,
    /// Decision staged, waiting for the commit barrier.
    Deciding,
    /// Decision being committed.
    Acting,
    /// Terminal; excluded from every later tick.
    Failed {
        /// What went wrong.
        reason: String,
    },
}

impl fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Perceiving => write!(f, "perceiving"),
            Self::Deciding => write!(f, "deciding"),
            Self::Acting => write!(f, "acting"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Every write one runtime wants to make this tick.
#[derive(Debug, Clone)]
pub struct Decision {
    /// Who decided.
    pub agent: AgentId,
    /// Tick the decision belongs to.
    pub tick: u64,
    /// State to publish. Its affinity row is refreshed at commit.
    pub next_state: AgentState,
    /// Memories to append, in order.
    pub memories: Vec<NewMemory>,
    /// Affinity adjustments from this agent towards others.
    pub affinity_deltas: Vec<(AgentId, f64)>,
    /// Override to install.
    pub schedule_override: Option<ScheduleOverride>,
    /// Memories recalled while deciding; refreshed at commit.
    pub recalled: Vec<MemoryId>,
    /// Agents inside the perception radius.
    pub seen: BTreeSet<AgentId>,
    /// Agents inside the interaction radius.
    pub met: BTreeSet<AgentId>,
    /// Reflection accumulator after this tick.
    pub reflection_accumulator: f64,
}

/// One agent's runtime.
#[derive(Debug)]
pub struct AgentRuntime {
    persona: Arc<AgentPersona>,
    phase: AgentPhase,
    state: AgentState,
    staged: Option<Decision>,
    last_seen: BTreeSet<AgentId>,
    last_met: BTreeSet<AgentId>,
    reflection_accumulator: f64,
}

impl AgentRuntime {
    /// A live runtime starting from `state`.
    #[must_use]
    pub fn new(persona: Arc<AgentPersona>, state: AgentState) -> Self {
        Self {
            persona,
            phase: AgentPhase::Idle,
            state,
            staged: None,
            last_seen: BTreeSet::new(),
            last_met: BTreeSet::new(),
            reflection_accumulator: 0.0,
        }
    }

    /// Agent id.
    #[must_use]
    pub fn id(&self) -> &AgentId {
        &self.persona.id
    }

    /// The persona this runtime animates.
    #[must_use]
    pub fn persona(&self) -> &AgentPersona {
        &self.persona
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> &AgentPhase {
        &self.phase
    }

    /// Last committed state.
    #[must_use]
    pub fn state(&self) -> &AgentState {
        &self.state
    }

    /// Importance accumulated towards the next reflection.
    #[must_use]
    pub fn reflection_accumulator(&self) -> f64 {
        self.reflection_accumulator
    }

    /// Whether the runtime still takes part in ticks.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !matches!(self.phase, AgentPhase::Failed { .. })
    }

    /// Enter Perceiving. Returns `false` for a failed runtime.
    pub fn begin_tick(&mut self) -> bool {
        if !self.is_live() {
            return false;
        }
        if self.phase != AgentPhase::Idle {
            debug!(agent = %self.id(), phase = %self.phase, "restarting from an abandoned tick");
        }
        self.staged = None;
        self.phase = AgentPhase::Perceiving;
        true
    }

    /// Hold `decision` until the commit barrier.
    pub fn stage(&mut self, decision: Decision) {
        if self.phase == AgentPhase::Perceiving {
            self.staged = Some(decision);
            self.phase = AgentPhase::Deciding;
        }
    }

    /// Hand the staged decision to the commit phase.
    pub fn take_staged(&mut self) -> Option<Decision> {
        let decision = self.staged.take()?;
        self.phase = AgentPhase::Acting;
        Some(decision)
    }

    /// Install a committed decision and return to Idle.
    pub fn finish(&mut self, decision: Decision, published: AgentState) {
        if self.phase != AgentPhase::Acting {
            return;
        }
        self.state = published;
        self.last_seen = decision.seen;
        self.last_met = decision.met;
        self.reflection_accumulator = decision.reflection_accumulator;
        self.phase = AgentPhase::Idle;
    }

    /// Drop any pending decision and return to Idle.
    pub fn discard(&mut self) {
        if self.is_live() {
            self.staged = None;
            self.phase = AgentPhase::Idle;
        }
    }

    /// Move to the terminal Failed state.
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(agent = %self.id(), %reason, "agent runtime failed");
        self.staged = None;
        self.phase = AgentPhase::Failed { reason };
    }

    /// Perceive, decide and materialise this tick's writes.
    ///
    /// Reads the context only; nothing shared changes until the world
    /// commits the returned decision.
    ///
    /// # Errors
    /// Any core error while reading the context (an empty schedule, an
    /// unresolvable location).
    pub fn decide(&self, ctx: &WorldContext, now: SimTime, tick: u64) -> Result<Decision> {
        let perception = self.perceive(ctx, now)?;

        let planned = ctx.schedule.resolve(&self.persona, now)?;
        let affinity = ctx.affinity.row(self.id());
        let radius = ctx.config.runtime.interaction_radius;
        let met: BTreeSet<AgentId> = perception
            .nearby_agents
            .iter()
            .filter(|a| a.distance <= radius)
            .map(|a| a.id.clone())
            .collect();
        let newly_met: BTreeSet<AgentId> = met.difference(&self.last_met).cloned().collect();
        let choice = ctx.policy.choose(&PolicyInput {
            persona: &self.persona,
            planned: &planned,
            perception: &perception,
            affinity: &affinity,
            newly_met: &newly_met,
            interaction_radius: radius,
            step_secs: ctx.config.clock.step_secs,
        });

        self.act(ctx, tick, perception, choice, &affinity, met)
    }

    fn perceive(&self, ctx: &WorldContext, now: SimTime) -> Result<Perception> {
        let position = self.state.position;
        let radius = ctx.config.runtime.perception_radius;
        let (located_at, nearby_locations, nearby) = {
            let spatial = ctx.spatial.read();
            (
                spatial.locate(&position).map(|n| n.id.clone()),
                spatial
                    .nodes_within(&position, radius)
                    .into_iter()
                    .map(|n| n.id.clone())
                    .collect::<Vec<_>>(),
                spatial.agents_within(&position, radius),
            )
        };

        let nearby_agents: Vec<PerceivedAgent> = {
            let states = ctx.states.read();
            nearby
                .into_iter()
                .filter(|(id, _)| id != self.id())
                .filter_map(|(id, distance)| {
                    let state = states.get(&id)?;
                    let name = ctx.personas.get(&id).map_or_else(|| id.to_string(), |p| p.name.clone());
                    Some(PerceivedAgent {
                        id,
                        name,
                        distance,
                        activity: state.current_activity.clone(),
                        location: state.current_location.clone(),
                    })
                })
                .collect()
        };

        let mut query = vec![self.state.current_activity.clone()];
        query.extend(nearby_agents.iter().map(|a| a.name.clone()));
        query.extend(nearby_locations.iter().filter_map(|id| location_name(ctx, id)));
        let recalled = ctx.memory.peek_scored(
            self.id(),
            &QueryContext::new(query.join(" ")),
            ctx.config.retrieval.top_k,
            now,
        )?;

        Ok(Perception {
            position,
            located_at,
            nearby_locations,
            nearby_agents,
            recalled,
        })
    }

    fn act(
        &self,
        ctx: &WorldContext,
        tick: u64,
        perception: Perception,
        choice: Choice,
        affinity: &BTreeMap<AgentId, f64>,
        met: BTreeSet<AgentId>,
    ) -> Result<Decision> {
        let agent = self.id().clone();
        let target = ctx.spatial.read().effective_position(&choice.location)?;
        let position = perception.position;
        let next_position = target.map_or(position, |t| {
            position.step_towards(&t, ctx.config.runtime.movement_speed)
        });
        let here = location_name(ctx, &choice.location).unwrap_or_else(|| choice.location.to_string());
        let tag = |memory: NewMemory| {
            memory
                .with_meta(metadata::LOCATION, choice.location.as_str())
                .with_meta(metadata::ACTIVITY, choice.activity.as_str())
                .with_meta(metadata::TICK, tick)
        };

        let mut memories = Vec::new();
        for other in perception
            .nearby_agents
            .iter()
            .filter(|a| !self.last_seen.contains(&a.id))
        {
            memories.push(tag(NewMemory::observation(
                agent.clone(),
                format!("Saw {} {} near {here}", other.name, other.activity),
                OBSERVATION_IMPORTANCE,
            )
            .with_meta(metadata::PARTICIPANTS, vec![other.id.to_string()])));
        }

        let arrived = target.is_some_and(|t| {
            next_position == t && (position != t || self.state.current_location != choice.location)
        });
        if arrived {
            memories.push(tag(NewMemory::observation(
                agent.clone(),
                format!("Arrived at {here} to {}", choice.activity),
                ARRIVAL_IMPORTANCE,
            )));
        }

        let mut affinity_deltas = Vec::new();
        if let Some(partner) = &choice.interact_with {
            let feeling = affinity.get(partner).copied().unwrap_or(0.0);
            let name = ctx.personas.get(partner).map_or_else(|| partner.to_string(), |p| p.name.clone());
            memories.push(tag(NewMemory::new(
                agent.clone(),
                MemoryKind::Interaction,
                format!("Talked with {name} while {}", choice.activity),
                INTERACTION_IMPORTANCE + 3.0 * feeling.abs().min(1.0),
            )
            .with_meta(metadata::PARTICIPANTS, vec![partner.to_string()])));
            affinity_deltas.push((partner.clone(), ctx.config.affinity.interaction_delta));
        }

        let emitted: f64 = memories.iter().map(|m| m.importance).sum();
        let mut accumulator = self.reflection_accumulator + emitted;
        if let Some(reflection) = reflect(&agent, &choice, &perception, accumulator, &ctx.config.reflection) {
            debug!(%agent, accumulated = accumulator, "reflection triggered");
            memories.push(tag(reflection));
            accumulator = 0.0;
        }

        Ok(Decision {
            agent: agent.clone(),
            tick,
            next_state: AgentState {
                id: agent,
                position: next_position,
                current_activity: choice.activity,
                current_location: choice.location,
                affinity: affinity.clone(),
            },
            memories,
            affinity_deltas,
            schedule_override: choice.schedule_override,
            recalled: perception.recalled.iter().map(|r| r.memory.id).collect(),
            seen: perception.nearby_agents.iter().map(|a| a.id.clone()).collect(),
            met,
            reflection_accumulator: accumulator,
        })
    }
}

/// A reflection over the best recalled memories, once enough importance has
/// piled up. Needs at least one memory to cite.
fn reflect(
    agent: &AgentId,
    choice: &Choice,
    perception: &Perception,
    accumulated: f64,
    config: &ReflectionConfig,
) -> Option<NewMemory> {
    if !config.enabled || accumulated < config.importance_threshold {
        return None;
    }
    let cited: Vec<_> = perception
        .recalled
        .iter()
        .take(config.max_citations.max(1))
        .map(|r| &r.memory)
        .collect();
    if cited.is_empty() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let importance = (cited.iter().map(|m| m.importance).sum::<f64>() / cited.len() as f64).max(1.0);
    let thoughts: Vec<&str> = cited.iter().map(|m| m.content.as_str()).collect();
    Some(
        NewMemory::new(
            agent.clone(),
            MemoryKind::Reflection,
            format!("Thinking it over while {}: {}", choice.activity, thoughts.join("; ")),
            importance,
        )
        .with_meta(
            metadata::CITATIONS,
            cited.iter().map(|m| m.id.to_string()).collect::<Vec<_>>(),
        ),
    )
}

fn location_name(ctx: &WorldContext, id: &SpatialId) -> Option<String> {
    ctx.spatial.read().resolve(id).ok().map(|n| n.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use township_core::types::Position;

    fn runtime() -> AgentRuntime {
        let persona = Arc::new(AgentPersona {
            id: "A1".into(),
            name: "Isabella".to_string(),
            age: 34,
            description: String::new(),
            traits: Vec::new(),
            schedule: Vec::new(),
            home: None,
            position: None,
            seed_memories: Vec::new(),
        });
        let state = AgentState {
            id: "A1".into(),
            position: Position::default(),
            current_activity: "idle".to_string(),
            current_location: "cafe".into(),
            affinity: BTreeMap::new(),
        };
        AgentRuntime::new(persona, state)
    }

    fn decision(rt: &AgentRuntime) -> Decision {
        let mut next = rt.state().clone();
        next.current_activity = "work".to_string();
        Decision {
            agent: rt.id().clone(),
            tick: 1,
            next_state: next,
            memories: Vec::new(),
            affinity_deltas: Vec::new(),
            schedule_override: None,
            recalled: Vec::new(),
            seen: BTreeSet::from([AgentId::from("B")]),
            met: BTreeSet::new(),
            reflection_accumulator: 12.0,
        }
    }

    #[test]
    fn walks_the_tick_cycle() {
        let mut rt = runtime();
        assert!(rt.begin_tick());
        assert_eq!(rt.phase(), &AgentPhase::Perceiving);
        let d = decision(&rt);
        rt.stage(d);
        assert_eq!(rt.phase(), &AgentPhase::Deciding);
        let d = rt.take_staged().expect("staged");
        assert_eq!(rt.phase(), &AgentPhase::Acting);
        let published = d.next_state.clone();
        rt.finish(d, published);
        assert_eq!(rt.phase(), &AgentPhase::Idle);
        assert_eq!(rt.state().current_activity, "work");
        assert!((rt.reflection_accumulator() - 12.0).abs() < f64::EPSILON);
    }

    #[test]
    fn discard_drops_the_pending_decision() {
        let mut rt = runtime();
        rt.begin_tick();
        let d = decision(&rt);
        rt.stage(d);
        rt.discard();
        assert_eq!(rt.phase(), &AgentPhase::Idle);
        assert!(rt.take_staged().is_none());
        assert_eq!(rt.state().current_activity, "idle");
    }

    #[test]
    fn failed_is_terminal() {
        let mut rt = runtime();
        rt.fail("boom");
        assert!(!rt.is_live());
        assert!(!rt.begin_tick());
        rt.discard();
        assert!(matches!(rt.phase(), AgentPhase::Failed { reason } if reason == "boom"));
    }
}
