//! World: the owned simulation context and its tick loop.
//!
//! Each tick has two phases separated by a barrier:
//!
//! 1. **Decide.** Every live runtime gets a blocking task that runs
//!    [`AgentRuntime::decide`] against the shared [`WorldContext`], bounded by
//!    `runtime.decide_timeout_ms`. Nothing shared is written. A runtime that
//!    errors, panics or times out is marked failed and left out of every
//!    later tick.
//! 2. **Commit.** Staged decisions are applied one runtime at a time in agent
//!    id order: memory refresh and append, affinity adjustment, schedule
//!    override, position update, state publish.
//!
//! Because decide only reads and commit order is fixed, the final state of a
//! tick does not depend on how the decide tasks were scheduled. A shutdown
//! signal that arrives during the decide phase discards every pending
//! decision; a tick is committed entirely or not at all.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use township_core::affinity::AffinityTable;
use township_core::config::TownConfig;
use township_core::error::TownError;
use township_core::loader::WorldDefinition;
use township_core::memory::{MemoryStore, NewMemory, metadata};
use township_core::persistence::{SnapshotStore, SqliteSnapshotStore};
use township_core::persona::{AgentPersona, AgentState};
use township_core::schedule::{self, ScheduleEngine};
use township_core::spatial::SpatialIndex;
use township_core::types::{AgentId, SimTime, SpatialId};

use crate::clock::{TickReport, WorldClock};
use crate::context::WorldContext;
use crate::error::{Result, SimError};
use crate::policy::{self, DecisionPolicy};
use crate::runtime::{AgentPhase, AgentRuntime, Decision};
use crate::snapshot::WorldSnapshot;

/// Activity label of an agent before its first tick.
pub const INITIAL_ACTIVITY: &str = "idle";

const REPORT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
struct RuntimeSlot {
    runtime: Arc<RwLock<AgentRuntime>>,
    failure: Option<String>,
}

impl RuntimeSlot {
    fn fail(&mut self, reason: String) {
        // a stalled decide task may still hold the read lock
        if let Some(mut runtime) = self.runtime.try_write() {
            runtime.fail(reason.clone());
        } else {
            warn!(%reason, "runtime busy, failure recorded on the world only");
        }
        self.failure = Some(reason);
    }
}

/// Builder for a [`World`] with a non-default policy or snapshot store.
pub struct WorldBuilder {
    definition: WorldDefinition,
    config: TownConfig,
    policy: Option<Arc<dyn DecisionPolicy>>,
    store: Option<Arc<dyn SnapshotStore>>,
}

impl WorldBuilder {
    /// Use `policy` instead of the configured one.
    #[must_use]
    pub fn policy(mut self, policy: Arc<dyn DecisionPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Restore from and flush to `store`.
    #[must_use]
    pub fn snapshot_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate everything and build the world.
    ///
    /// # Errors
    /// Invalid configuration, a malformed location forest, duplicate personas
    /// or unresolvable locations, and snapshot store failures.
    pub fn build(self) -> Result<World> {
        let Self {
            mut definition,
            config,
            policy,
            store,
        } = self;
        config.validate()?;
        // seeded memory ids follow agent id order, not declaration order
        definition.personas.sort_by(|a, b| a.id.cmp(&b.id));
        let mut index = definition.build_index()?;
        let unscheduled: BTreeSet<AgentId> = definition.validate(&index)?.into_iter().collect();

        let memory = MemoryStore::new(&config);
        let affinity = AffinityTable::new(&config.affinity)?;
        let clock = WorldClock::new(&config.clock, &config.decay);
        let start = clock.now();
        for persona in &definition.personas {
            memory.register_agent(persona.id.clone());
        }

        // saved logs first so seeded ids never collide with restored ones
        let mut restored = BTreeSet::new();
        if let Some(store) = &store {
            for persona in &definition.personas {
                if let Some(entries) = store.load_memories(&persona.id)? {
                    memory.import(entries)?;
                    restored.insert(persona.id.clone());
                }
            }
            affinity.import(store.load_affinities()?)?;
            info!(restored = restored.len(), "world state restored from snapshot store");
        }
        for persona in definition.personas.iter().filter(|p| !restored.contains(&p.id)) {
            for seed in &persona.seed_memories {
                memory.append(
                    NewMemory::observation(persona.id.clone(), seed.content.clone(), seed.importance)
                        .with_meta(metadata::ACTIVITY, "remembering"),
                    start,
                )?;
            }
        }

        let mut personas = BTreeMap::new();
        let mut states = BTreeMap::new();
        let mut slots = BTreeMap::new();
        for persona in definition.personas {
            let persona = Arc::new(persona);
            let location = starting_location(&persona, &index, start)?;
            let position = persona
                .position
                .or(index.effective_position(&location)?)
                .unwrap_or_default();
            index.place_agent(persona.id.clone(), position);
            let state = AgentState {
                id: persona.id.clone(),
                position,
                current_activity: INITIAL_ACTIVITY.to_string(),
                current_location: location,
                affinity: affinity.row(&persona.id),
            };

            let mut runtime = AgentRuntime::new(Arc::clone(&persona), state.clone());
            let failure = if unscheduled.contains(&persona.id) {
                let reason = TownError::EmptySchedule(persona.id.clone()).to_string();
                runtime.fail(reason.clone());
                Some(reason)
            } else {
                None
            };
            states.insert(persona.id.clone(), state);
            slots.insert(
                persona.id.clone(),
                RuntimeSlot {
                    runtime: Arc::new(RwLock::new(runtime)),
                    failure,
                },
            );
            personas.insert(persona.id.clone(), persona);
        }

        let policy = policy.unwrap_or_else(|| policy::from_kind(config.runtime.policy));
        info!(
            agents = slots.len(),
            locations = index.len(),
            policy = policy.name(),
            start = %start,
            "world initialised"
        );
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        Ok(World {
            ctx: Arc::new(WorldContext {
                config,
                personas,
                spatial: RwLock::new(index),
                memory,
                affinity,
                schedule: ScheduleEngine::new(),
                states: RwLock::new(states),
                policy,
            }),
            slots,
            clock,
            reports,
            store,
        })
    }
}

/// Where an agent starts: home, else the planned location, else the first root.
fn starting_location(persona: &AgentPersona, index: &SpatialIndex, start: SimTime) -> Result<SpatialId> {
    if let Some(home) = &persona.home {
        return Ok(home.clone());
    }
    if let Ok(item) = schedule::planned_activity(persona, start.time_of_day()) {
        return Ok(item.location);
    }
    index.roots().into_iter().next().ok_or_else(|| {
        SimError::Core(TownError::Config(format!(
            "persona {} has nowhere to start: no home, no schedule, no locations",
            persona.id
        )))
    })
}

/// A running simulation.
pub struct World {
    ctx: Arc<WorldContext>,
    slots: BTreeMap<AgentId, RuntimeSlot>,
    clock: WorldClock,
    reports: broadcast::Sender<TickReport>,
    store: Option<Arc<dyn SnapshotStore>>,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("tick", &self.clock.tick())
            .field("time", &self.clock.now())
            .field("agents", &self.slots.len())
            .finish_non_exhaustive()
    }
}

impl World {
    /// Build a world from a definition, opening the SQLite snapshot store
    /// when `persistence.enabled` is set.
    ///
    /// # Errors
    /// See [`WorldBuilder::build`].
    pub fn init(definition: WorldDefinition, config: TownConfig) -> Result<Self> {
        let mut builder = Self::builder(definition, config);
        if builder.config.persistence.enabled {
            let store = SqliteSnapshotStore::from_config(&builder.config.persistence)?;
            builder = builder.snapshot_store(Arc::new(store));
        }
        builder.build()
    }

    /// Start building a world.
    #[must_use]
    pub fn builder(definition: WorldDefinition, config: TownConfig) -> WorldBuilder {
        WorldBuilder {
            definition,
            config,
            policy: None,
            store: None,
        }
    }

    /// The shared context.
    #[must_use]
    pub fn context(&self) -> &Arc<WorldContext> {
        &self.ctx
    }

    /// The clock.
    #[must_use]
    pub fn clock(&self) -> &WorldClock {
        &self.clock
    }

    /// Phase of `agent`'s runtime.
    #[must_use]
    pub fn phase(&self, agent: &AgentId) -> Option<AgentPhase> {
        self.slots.get(agent).map(|slot| match &slot.failure {
            Some(reason) => AgentPhase::Failed {
                reason: reason.clone(),
            },
            None => slot.runtime.read().phase().clone(),
        })
    }

    /// Importance accumulated towards `agent`'s next reflection.
    #[must_use]
    pub fn reflection_accumulator(&self, agent: &AgentId) -> Option<f64> {
        self.slots
            .get(agent)
            .map(|slot| slot.runtime.read().reflection_accumulator())
    }

    /// Agents still being simulated, in id order.
    #[must_use]
    pub fn live_agents(&self) -> Vec<AgentId> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.failure.is_none())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Read-only view of the world after the last completed tick.
    #[must_use]
    pub fn snapshot(&self) -> WorldSnapshot {
        WorldSnapshot {
            tick: self.clock.tick(),
            time: self.clock.now(),
            agents: self.ctx.states(),
            failed: self
                .slots
                .iter()
                .filter_map(|(id, slot)| slot.failure.clone().map(|r| (id.clone(), r)))
                .collect(),
        }
    }

    /// Receive a [`TickReport`] after every completed tick.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TickReport> {
        self.reports.subscribe()
    }

    /// Run one tick.
    ///
    /// # Errors
    /// [`SimError::NoLiveAgents`] when every runtime has failed.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let (_keep, mut shutdown) = watch::channel(false);
        self.step(&[], &mut shutdown).await
    }

    /// Run one tick, dispatching decide tasks in `order` (remaining live
    /// agents follow in id order). The committed result is the same for
    /// every order.
    ///
    /// # Errors
    /// [`SimError::NoLiveAgents`] when every runtime has failed.
    pub async fn tick_with_dispatch_order(&mut self, order: &[AgentId]) -> Result<TickReport> {
        let (_keep, mut shutdown) = watch::channel(false);
        self.step(order, &mut shutdown).await
    }

    /// Run up to `ticks` ticks, stopping early when `shutdown` turns true.
    ///
    /// # Errors
    /// [`SimError::Cancelled`] if shutdown interrupted a tick (nothing from
    /// that tick is committed) and [`SimError::NoLiveAgents`].
    pub async fn run(&mut self, ticks: u64, mut shutdown: watch::Receiver<bool>) -> Result<WorldSnapshot> {
        for _ in 0..ticks {
            self.step(&[], &mut shutdown).await?;
        }
        Ok(self.snapshot())
    }

    /// Flush memories and affinities to the snapshot store, if any, and
    /// return the final snapshot.
    ///
    /// # Errors
    /// Snapshot store failures.
    pub fn teardown(self) -> Result<WorldSnapshot> {
        let snapshot = self.snapshot();
        if let Some(store) = &self.store {
            let agents = self.ctx.memory.agents();
            for agent in &agents {
                store.save_memories(agent, &self.ctx.memory.export(agent)?)?;
            }
            store.save_affinities(&self.ctx.affinity.export())?;
            info!(agents = agents.len(), tick = snapshot.tick, "world state flushed");
        }
        Ok(snapshot)
    }

    #[instrument(skip_all, fields(tick = self.clock.tick() + 1))]
    async fn step(&mut self, order: &[AgentId], shutdown: &mut watch::Receiver<bool>) -> Result<TickReport> {
        let live = self.live_agents();
        if live.is_empty() {
            return Err(SimError::NoLiveAgents);
        }
        let tick = self.clock.tick() + 1;
        let now = self.clock.now();

        let mut dispatch: Vec<AgentId> = order.iter().filter(|id| live.contains(id)).cloned().collect();
        for id in &live {
            if !dispatch.contains(id) {
                dispatch.push(id.clone());
            }
        }

        // ---- decide ----
        let timeout_ms = self.ctx.config.runtime.decide_timeout_ms;
        let mut tasks = JoinSet::new();
        for id in &dispatch {
            let Some(slot) = self.slots.get(id) else { continue };
            slot.runtime.write().begin_tick();
            let runtime = Arc::clone(&slot.runtime);
            let ctx = Arc::clone(&self.ctx);
            let agent = id.clone();
            tasks.spawn(async move {
                let blocking = tokio::task::spawn_blocking(move || {
                    let guard = runtime.read();
                    guard.decide(&ctx, now, tick)
                });
                let outcome = match tokio::time::timeout(Duration::from_millis(timeout_ms), blocking).await {
                    Ok(Ok(Ok(decision))) => Ok(decision),
                    Ok(Ok(Err(err))) => Err(SimError::Core(err)),
                    Ok(Err(join)) => Err(SimError::TaskFailed {
                        agent: agent.clone(),
                        reason: join.to_string(),
                    }),
                    Err(_) => Err(SimError::DecideTimeout {
                        agent: agent.clone(),
                        timeout_ms,
                    }),
                };
                (agent, outcome)
            });
        }

        let collected = tokio::select! {
            biased;
            () = shutdown_requested(shutdown) => None,
            outcomes = collect(&mut tasks) => Some(outcomes),
        };
        let Some(mut outcomes) = collected else {
            tasks.abort_all();
            for id in &dispatch {
                if let Some(mut runtime) = self.slots.get(id).and_then(|s| s.runtime.try_write()) {
                    runtime.discard();
                }
            }
            info!(tick, "shutdown requested, tick cancelled");
            return Err(SimError::Cancelled { tick });
        };

        let mut failed = Vec::new();
        for id in &dispatch {
            let outcome = outcomes.remove(id).unwrap_or_else(|| {
                Err(SimError::TaskFailed {
                    agent: id.clone(),
                    reason: "decide task vanished".to_string(),
                })
            });
            let Some(slot) = self.slots.get_mut(id) else { continue };
            match outcome {
                Ok(decision) => slot.runtime.write().stage(decision),
                Err(err) => {
                    slot.fail(err.to_string());
                    failed.push(id.clone());
                }
            }
        }

        // ---- commit ----
        let mut committed = 0;
        let mut memories_appended = 0;
        for (id, slot) in &mut self.slots {
            if slot.failure.is_some() {
                continue;
            }
            let Some(decision) = slot.runtime.write().take_staged() else {
                continue;
            };
            match commit(&self.ctx, &decision, now) {
                Ok((appended, published)) => {
                    slot.runtime.write().finish(decision, published);
                    committed += 1;
                    memories_appended += appended;
                }
                Err(err) => {
                    slot.fail(err.to_string());
                    failed.push(id.clone());
                }
            }
        }

        let pruned = self.ctx.schedule.prune_expired(now);
        let time = self.clock.advance();
        let decay = self.clock.decay_due().then(|| self.ctx.memory.decay_all(time));

        let report = TickReport {
            tick,
            decided_at: now,
            time,
            committed,
            memories_appended,
            failed,
            decay,
        };
        debug!(
            committed,
            memories_appended,
            failed = report.failed.len(),
            pruned,
            %time,
            "tick complete"
        );
        // no subscribers is fine
        let _ = self.reports.send(report.clone());
        Ok(report)
    }
}

/// Apply one decision. Returns the number of memories appended and the
/// published state.
///
/// Every write is checked before the first one lands, so a rejected decision
/// leaves the store, the affinity table and the published state untouched.
fn commit(ctx: &WorldContext, decision: &Decision, now: SimTime) -> std::result::Result<(usize, AgentState), TownError> {
    let agent = &decision.agent;
    if !ctx.memory.is_registered(agent) {
        return Err(TownError::UnknownAgent(agent.clone()));
    }
    for memory in &decision.memories {
        ctx.memory.check_append(memory, now)?;
    }
    for (_, delta) in &decision.affinity_deltas {
        AffinityTable::check_delta(*delta)?;
    }

    ctx.memory.mark_accessed(agent, &decision.recalled, now)?;
    let mut appended = 0;
    for memory in &decision.memories {
        ctx.memory.append(memory.clone(), now)?;
        appended += 1;
    }
    for (other, delta) in &decision.affinity_deltas {
        ctx.affinity.adjust(agent, other, *delta)?;
    }
    if let Some(spec) = &decision.schedule_override {
        ctx.schedule.override_activity(agent, spec.clone(), now);
    }
    ctx.spatial.write().place_agent(agent.clone(), decision.next_state.position);

    let mut published = decision.next_state.clone();
    published.affinity = ctx.affinity.row(agent);
    ctx.states.write().insert(agent.clone(), published.clone());
    Ok((appended, published))
}

async fn collect(tasks: &mut JoinSet<(AgentId, Result<Decision>)>) -> BTreeMap<AgentId, Result<Decision>> {
    let mut outcomes = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((agent, outcome)) => {
                outcomes.insert(agent, outcome);
            }
            Err(err) => warn!(error = %err, "decide supervisor task failed"),
        }
    }
    outcomes
}

/// Resolves once `shutdown` reads true; never resolves if the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAIR: &str = r#"{
        "locations": [{"id": "plaza", "name": "Plaza", "type": "town", "position": {"x": 0.0, "y": 0.0}}],
        "personas": [
            {"id": "ann", "name": "Ann", "age": 40,
             "schedule": [{"time": "08:00", "activity": "strolling", "location": "plaza"}]},
            {"id": "bo", "name": "Bo", "age": 22,
             "schedule": [{"time": "08:00", "activity": "busking", "location": "plaza"}]}
        ]
    }"#;

    fn world() -> World {
        let definition = WorldDefinition::from_json(PAIR).expect("valid world");
        World::init(definition, TownConfig::default()).expect("valid config")
    }

    fn decision(world: &World, agent: &AgentId) -> Decision {
        let mut next_state = world.context().state(agent).expect("placed");
        next_state.current_activity = "waving".to_string();
        Decision {
            agent: agent.clone(),
            tick: 1,
            next_state,
            memories: vec![NewMemory::observation(agent.clone(), "Saw Bo busking", 3.0)],
            affinity_deltas: vec![(AgentId::from("bo"), 0.1)],
            schedule_override: None,
            recalled: Vec::new(),
            seen: BTreeSet::new(),
            met: BTreeSet::new(),
            reflection_accumulator: 0.0,
        }
    }

    #[test]
    fn rejected_write_leaves_no_partial_commit() {
        let world = world();
        let ann = AgentId::from("ann");
        let state_before = world.context().state(&ann).expect("placed");
        let now = world.clock().now();

        let mut bad = decision(&world, &ann);
        bad.affinity_deltas.push((AgentId::from("bo"), f64::INFINITY));
        assert!(matches!(commit(&world.ctx, &bad, now), Err(TownError::InvalidScore(_))));

        let mut future = decision(&world, &ann);
        future.memories.push(
            NewMemory::observation(ann.clone(), "Not yet", 1.0).created_at(now.plus_secs(60)),
        );
        assert!(matches!(
            commit(&world.ctx, &future, now),
            Err(TownError::InvalidTimestamps { .. })
        ));

        assert!(world.context().memory().export(&ann).expect("registered").is_empty());
        assert!(world.context().affinity().export().is_empty());
        assert_eq!(world.context().state(&ann).expect("placed"), state_before);

        let (appended, published) = commit(&world.ctx, &decision(&world, &ann), now).expect("valid decision");
        assert_eq!(appended, 1);
        assert_eq!(published.current_activity, "waving");
        assert!((published.affinity[&AgentId::from("bo")] - 0.1).abs() < 1e-12);
    }
}
