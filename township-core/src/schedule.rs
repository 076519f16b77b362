//! Schedule Engine: what an agent should be doing at a given time.
//!
//! The planned activity comes from the persona's daily schedule: the last
//! item whose start time is at or before the current time of day, wrapping
//! to the day's latest item before the first one starts. Runtimes can push a
//! temporary override (reacting to an event); overrides carry a priority and
//! expire purely as a function of simulated time, so replaying the same tick
//! sequence always resolves the same activity.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TownError};
use crate::persona::{AgentPersona, ScheduleItem};
use crate::types::{AgentId, SimTime, SpatialId, TimeOfDay};

/// A temporary replacement for the planned activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleOverride {
    /// Activity label.
    pub activity: String,
    /// Where it happens.
    pub location: SpatialId,
    /// Higher priorities cannot be displaced by lower ones while active.
    pub priority: u8,
    /// How long it lasts, in simulated seconds.
    pub duration_secs: u64,
}

#[derive(Debug, Clone)]
struct ActiveOverride {
    spec: ScheduleOverride,
    expires_at: SimTime,
}

/// Where a resolved activity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySource {
    /// The persona's daily schedule.
    Schedule,
    /// An override that is still active.
    Override {
        /// Its priority.
        priority: u8,
        /// When it stops applying.
        expires_at: SimTime,
    },
}

/// The activity an agent should pursue right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedActivity {
    /// Activity label.
    pub activity: String,
    /// Target location.
    pub location: SpatialId,
    /// Schedule or override.
    pub source: ActivitySource,
}

/// Select the planned schedule item for `time` of day.
///
/// # Errors
/// Returns [`TownError::EmptySchedule`] if the persona has no items.
pub fn planned_activity(persona: &AgentPersona, time: TimeOfDay) -> Result<ScheduleItem> {
    let mut current: Option<&ScheduleItem> = None;
    let mut latest: Option<&ScheduleItem> = None;
    for item in &persona.schedule {
        if item.time <= time && current.is_none_or(|c| item.time >= c.time) {
            current = Some(item);
        }
        if latest.is_none_or(|l| item.time >= l.time) {
            latest = Some(item);
        }
    }
    current
        .or(latest)
        .cloned()
        .ok_or_else(|| TownError::EmptySchedule(persona.id.clone()))
}

/// Planned activities plus per-agent overrides.
#[derive(Debug, Default)]
pub struct ScheduleEngine {
    overrides: RwLock<HashMap<AgentId, ActiveOverride>>,
}

impl ScheduleEngine {
    /// Create an engine with no overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the planned schedule item at `now`.
    ///
    /// # Errors
    /// Returns [`TownError::EmptySchedule`] if the persona has no items.
    pub fn planned_activity(&self, persona: &AgentPersona, now: SimTime) -> Result<ScheduleItem> {
        planned_activity(persona, now.time_of_day())
    }

    /// Replace the planned activity for `spec.duration_secs` from `now`.
    ///
    /// Returns `false` (and changes nothing) when an active override with a
    /// strictly higher priority is already in place.
    pub fn override_activity(&self, agent: &AgentId, spec: ScheduleOverride, now: SimTime) -> bool {
        let mut overrides = self.overrides.write();
        if let Some(existing) = overrides.get(agent) {
            if now < existing.expires_at && existing.spec.priority > spec.priority {
                debug!(%agent, kept = existing.spec.priority, rejected = spec.priority, "override rejected");
                return false;
            }
        }
        let expires_at = now.plus_secs(spec.duration_secs);
        debug!(%agent, activity = %spec.activity, %expires_at, "override installed");
        overrides.insert(agent.clone(), ActiveOverride { spec, expires_at });
        true
    }

    /// The override in force at `now`, if any.
    #[must_use]
    pub fn active_override(&self, agent: &AgentId, now: SimTime) -> Option<(ScheduleOverride, SimTime)> {
        self.overrides
            .read()
            .get(agent)
            .filter(|o| now < o.expires_at)
            .map(|o| (o.spec.clone(), o.expires_at))
    }

    /// Drop any override for `agent`.
    pub fn clear_override(&self, agent: &AgentId) {
        self.overrides.write().remove(agent);
    }

    /// Drop overrides that have expired by `now`. Housekeeping only;
    /// resolution already ignores them.
    pub fn prune_expired(&self, now: SimTime) -> usize {
        let mut overrides = self.overrides.write();
        let before = overrides.len();
        overrides.retain(|_, o| now < o.expires_at);
        before - overrides.len()
    }

    /// What `persona` should be doing at `now`.
    ///
    /// # Errors
    /// Returns [`TownError::EmptySchedule`] if no override is active and the
    /// persona has no items.
    pub fn resolve(&self, persona: &AgentPersona, now: SimTime) -> Result<ResolvedActivity> {
        if let Some((spec, expires_at)) = self.active_override(&persona.id, now) {
            return Ok(ResolvedActivity {
                activity: spec.activity,
                location: spec.location,
                source: ActivitySource::Override {
                    priority: spec.priority,
                    expires_at,
                },
            });
        }
        let item = self.planned_activity(persona, now)?;
        Ok(ResolvedActivity {
            activity: item.activity,
            location: item.location,
            source: ActivitySource::Schedule,
        })
    }
}
