//! The Memory Store: append-only per-agent memory logs.
//!
//! Each agent's log lives behind its own `RwLock` inside a `DashMap`, so two
//! agents never contend and one agent's writes are serialised. Inside a log,
//! hot entries are indexed by id (hash map) and by `(last_accessed_at, id)`
//! (ordered set) for recency queries. When the hot set outgrows
//! `hot_capacity` the least recently accessed entries move to the archive,
//! where `get` still finds them but retrieval no longer scores them.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::config::{DecayConfig, TownConfig};
use crate::decay;
use crate::error::{Result, TownError};
use crate::memory::{MemoryEntry, NewMemory, QueryContext};
use crate::retrieval::{RetrievalEngine, RetrievalResult};
use crate::types::{AgentId, MemoryId, SimTime};

/// Outcome of a decay pass over one agent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DecayReport {
    /// Entries whose importance went down.
    pub decayed: usize,
    /// Total importance removed.
    pub importance_lost: f64,
}

#[derive(Debug, Default)]
struct AgentLog {
    hot: HashMap<MemoryId, MemoryEntry>,
    archive: HashMap<MemoryId, MemoryEntry>,
    recency: BTreeSet<(SimTime, MemoryId)>,
    max_importance: f64,
}

impl AgentLog {
    fn insert(&mut self, entry: MemoryEntry) {
        self.max_importance = self.max_importance.max(entry.importance);
        self.recency.insert((entry.last_accessed_at, entry.id));
        self.hot.insert(entry.id, entry);
    }

    fn touch(&mut self, id: MemoryId, now: SimTime) -> Option<&MemoryEntry> {
        let entry = self.hot.get_mut(&id)?;
        self.recency.remove(&(entry.last_accessed_at, id));
        entry.record_access(now);
        self.recency.insert((entry.last_accessed_at, id));
        Some(entry)
    }

    fn archive_overflow(&mut self, capacity: usize) -> usize {
        let mut moved = 0;
        while self.hot.len() > capacity {
            let Some(oldest) = self.recency.pop_first() else {
                break;
            };
            if let Some(entry) = self.hot.remove(&oldest.1) {
                self.archive.insert(oldest.1, entry);
                moved += 1;
            }
        }
        moved
    }

    fn get(&self, id: MemoryId) -> Option<&MemoryEntry> {
        self.hot.get(&id).or_else(|| self.archive.get(&id))
    }
}

/// Shared, thread-safe store of every agent's memories.
#[derive(Debug)]
pub struct MemoryStore {
    logs: DashMap<AgentId, Arc<RwLock<AgentLog>>>,
    owners: DashMap<MemoryId, AgentId>,
    next_id: AtomicU64,
    engine: RetrievalEngine,
    decay: DecayConfig,
    hot_capacity: usize,
}

impl MemoryStore {
    /// Create a store from configuration.
    #[must_use]
    pub fn new(config: &TownConfig) -> Self {
        Self::with_engine(
            RetrievalEngine::new(&config.retrieval, &config.decay),
            config.decay.clone(),
            config.memory.hot_capacity,
        )
    }

    /// Create a store with an explicit retrieval engine.
    #[must_use]
    pub fn with_engine(engine: RetrievalEngine, decay: DecayConfig, hot_capacity: usize) -> Self {
        Self {
            logs: DashMap::new(),
            owners: DashMap::new(),
            next_id: AtomicU64::new(1),
            engine,
            decay,
            hot_capacity: hot_capacity.max(1),
        }
    }

    /// Make `agent` known to the store. Idempotent.
    pub fn register_agent(&self, agent: AgentId) {
        self.logs.entry(agent).or_default();
    }

    /// Whether `agent` has been registered.
    #[must_use]
    pub fn is_registered(&self, agent: &AgentId) -> bool {
        self.logs.contains_key(agent)
    }

    /// Registered agents in id order.
    #[must_use]
    pub fn agents(&self) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self.logs.iter().map(|e| e.key().clone()).collect();
        agents.sort();
        agents
    }

    fn log(&self, agent: &AgentId) -> Result<Arc<RwLock<AgentLog>>> {
        self.logs
            .get(agent)
            .map(|l| Arc::clone(l.value()))
            .ok_or_else(|| TownError::UnknownAgent(agent.clone()))
    }

    fn reserve_id(&self, requested: Option<MemoryId>, agent: &AgentId) -> Result<MemoryId> {
        if let Some(id) = requested {
            return match self.owners.entry(id) {
                Entry::Occupied(_) => Err(TownError::DuplicateMemory(id)),
                Entry::Vacant(slot) => {
                    slot.insert(agent.clone());
                    self.next_id.fetch_max(id.0.saturating_add(1), Ordering::SeqCst);
                    Ok(id)
                }
            };
        }
        loop {
            let id = MemoryId(self.next_id.fetch_add(1, Ordering::SeqCst));
            if let Entry::Vacant(slot) = self.owners.entry(id) {
                slot.insert(agent.clone());
                return Ok(id);
            }
        }
    }

    fn validate(importance: f64, created: SimTime, accessed: SimTime) -> Result<()> {
        if !importance.is_finite() || importance < 0.0 {
            return Err(TownError::InvalidScore(importance));
        }
        if created > accessed {
            return Err(TownError::InvalidTimestamps {
                created: created.secs(),
                accessed: accessed.secs(),
            });
        }
        Ok(())
    }

    /// Check that [`append`](Self::append) would accept `memory` at `now`
    /// without writing anything.
    ///
    /// Timestamps must satisfy `created_at <= last_accessed_at <= now`.
    ///
    /// # Errors
    /// Same as [`append`](Self::append).
    pub fn check_append(&self, memory: &NewMemory, now: SimTime) -> Result<()> {
        self.log(&memory.agent_id)?;
        let created_at = memory.created_at.unwrap_or(now);
        let last_accessed_at = memory.last_accessed_at.unwrap_or(created_at);
        Self::validate(memory.importance, created_at, last_accessed_at)?;
        if last_accessed_at > now {
            return Err(TownError::InvalidTimestamps {
                created: created_at.secs(),
                accessed: last_accessed_at.secs(),
            });
        }
        if let Some(id) = memory.id {
            if self.owners.contains_key(&id) {
                return Err(TownError::DuplicateMemory(id));
            }
        }
        Ok(())
    }

    /// Append a memory, returning its id.
    ///
    /// # Errors
    /// [`TownError::UnknownAgent`], [`TownError::InvalidScore`],
    /// [`TownError::InvalidTimestamps`] (including timestamps after `now`) or
    /// [`TownError::DuplicateMemory`]. The store is unchanged on error.
    pub fn append(&self, memory: NewMemory, now: SimTime) -> Result<MemoryId> {
        self.check_append(&memory, now)?;
        let log = self.log(&memory.agent_id)?;
        let created_at = memory.created_at.unwrap_or(now);
        let last_accessed_at = memory.last_accessed_at.unwrap_or(created_at);

        let id = self.reserve_id(memory.id, &memory.agent_id)?;
        let entry = MemoryEntry {
            id,
            agent_id: memory.agent_id,
            content: memory.content,
            created_at,
            last_accessed_at,
            importance: memory.importance,
            kind: memory.kind,
            metadata: memory.metadata,
            decayed_through: None,
        };
        trace!(agent = %entry.agent_id, %id, kind = %entry.kind, "memory appended");

        let mut log = log.write();
        log.insert(entry);
        let archived = log.archive_overflow(self.hot_capacity);
        if archived > 0 {
            debug!(archived, "hot memory over capacity, archived oldest entries");
        }
        Ok(id)
    }

    /// Look up one of `agent`'s memories, hot or archived.
    ///
    /// # Errors
    /// [`TownError::UnknownAgent`] or [`TownError::NotFound`].
    pub fn get(&self, agent: &AgentId, id: MemoryId) -> Result<MemoryEntry> {
        self.log(agent)?
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| TownError::not_found("memory", id))
    }

    /// Look up a memory by id alone.
    ///
    /// # Errors
    /// [`TownError::NotFound`] if no agent owns `id`.
    pub fn find(&self, id: MemoryId) -> Result<MemoryEntry> {
        let owner = self
            .owners
            .get(&id)
            .map(|o| o.value().clone())
            .ok_or_else(|| TownError::not_found("memory", id))?;
        self.get(&owner, id)
    }

    /// The `n` most recently accessed hot memories, newest first.
    ///
    /// # Errors
    /// [`TownError::UnknownAgent`].
    pub fn recent(&self, agent: &AgentId, n: usize) -> Result<Vec<MemoryEntry>> {
        let log = self.log(agent)?;
        let log = log.read();
        Ok(log
            .recency
            .iter()
            .rev()
            .take(n)
            .filter_map(|(_, id)| log.hot.get(id).cloned())
            .collect())
    }

    /// Hot and archived entry counts for `agent`.
    ///
    /// # Errors
    /// [`TownError::UnknownAgent`].
    pub fn counts(&self, agent: &AgentId) -> Result<(usize, usize)> {
        let log = self.log(agent)?;
        let log = log.read();
        Ok((log.hot.len(), log.archive.len()))
    }

    /// Highest importance ever appended for `agent`.
    ///
    /// # Errors
    /// [`TownError::UnknownAgent`].
    pub fn max_importance(&self, agent: &AgentId) -> Result<f64> {
        Ok(self.log(agent)?.read().max_importance)
    }

    /// Up to `k` of `agent`'s memories, most relevant first.
    ///
    /// Every returned entry has its `last_accessed_at` set to `now`.
    ///
    /// # Errors
    /// [`TownError::UnknownAgent`].
    pub fn retrieve(
        &self,
        agent: &AgentId,
        query: &QueryContext,
        k: usize,
        now: SimTime,
    ) -> Result<Vec<MemoryEntry>> {
        Ok(self
            .retrieve_scored(agent, query, k, now)?
            .into_iter()
            .map(|r| r.memory)
            .collect())
    }

    /// Like [`retrieve`](Self::retrieve) but keeps the score breakdowns.
    ///
    /// # Errors
    /// [`TownError::UnknownAgent`].
    pub fn retrieve_scored(
        &self,
        agent: &AgentId,
        query: &QueryContext,
        k: usize,
        now: SimTime,
    ) -> Result<Vec<RetrievalResult>> {
        let log = self.log(agent)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut log = log.write();
        let mut results = self
            .engine
            .rank(log.hot.values(), query, now, log.max_importance, k);
        for result in &mut results {
            if let Some(refreshed) = log.touch(result.memory.id, now) {
                result.memory.last_accessed_at = refreshed.last_accessed_at;
            }
        }
        trace!(%agent, returned = results.len(), "memories retrieved");
        Ok(results)
    }

    /// Rank like [`retrieve_scored`](Self::retrieve_scored) without recording
    /// the access. Pair with [`mark_accessed`](Self::mark_accessed) when the
    /// read and the refresh happen in different phases.
    ///
    /// # Errors
    /// [`TownError::UnknownAgent`].
    pub fn peek_scored(
        &self,
        agent: &AgentId,
        query: &QueryContext,
        k: usize,
        now: SimTime,
    ) -> Result<Vec<RetrievalResult>> {
        let log = self.log(agent)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let log = log.read();
        Ok(self
            .engine
            .rank(log.hot.values(), query, now, log.max_importance, k))
    }

    /// Record a recall of `ids` at `now`. Ids not in the hot set are skipped;
    /// returns how many were refreshed.
    ///
    /// # Errors
    /// [`TownError::UnknownAgent`].
    pub fn mark_accessed(&self, agent: &AgentId, ids: &[MemoryId], now: SimTime) -> Result<usize> {
        let log = self.log(agent)?;
        let mut log = log.write();
        Ok(ids.iter().filter(|id| log.touch(**id, now).is_some()).count())
    }

    /// Down-weight `agent`'s idle memories.
    ///
    /// # Errors
    /// [`TownError::UnknownAgent`].
    pub fn decay(&self, agent: &AgentId, now: SimTime) -> Result<DecayReport> {
        let log = self.log(agent)?;
        let mut log = log.write();
        let mut report = DecayReport::default();
        let AgentLog { hot, archive, .. } = &mut *log;
        for entry in hot.values_mut().chain(archive.values_mut()) {
            let lost = decay::decay_entry(entry, now, &self.decay);
            if lost > 0.0 {
                report.decayed += 1;
                report.importance_lost += lost;
            }
        }
        Ok(report)
    }

    /// Run [`decay`](Self::decay) for every registered agent.
    pub fn decay_all(&self, now: SimTime) -> DecayReport {
        let mut total = DecayReport::default();
        for agent in self.agents() {
            if let Ok(report) = self.decay(&agent, now) {
                total.decayed += report.decayed;
                total.importance_lost += report.importance_lost;
            }
        }
        debug!(decayed = total.decayed, lost = total.importance_lost, "decay pass complete");
        total
    }

    /// Every entry of `agent` (hot and archived) in id order.
    ///
    /// # Errors
    /// [`TownError::UnknownAgent`].
    pub fn export(&self, agent: &AgentId) -> Result<Vec<MemoryEntry>> {
        let log = self.log(agent)?;
        let log = log.read();
        let mut entries: Vec<MemoryEntry> =
            log.hot.values().chain(log.archive.values()).cloned().collect();
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    /// Restore previously exported entries verbatim.
    ///
    /// # Errors
    /// Fails on the first entry that would violate a store invariant; entries
    /// before it stay imported.
    pub fn import(&self, entries: impl IntoIterator<Item = MemoryEntry>) -> Result<usize> {
        let mut count = 0;
        for entry in entries {
            let log = self.log(&entry.agent_id)?;
            Self::validate(entry.importance, entry.created_at, entry.last_accessed_at)?;
            self.reserve_id(Some(entry.id), &entry.agent_id)?;
            let mut log = log.write();
            log.insert(entry);
            log.archive_overflow(self.hot_capacity);
            count += 1;
        }
        Ok(count)
    }
}
