//! Decision policies: the pluggable "Deciding" step of a runtime.
//!
//! A policy sees what the runtime perceived, what the schedule says and how
//! the agent feels about everyone nearby, and picks what to do. It never
//! touches shared state; the runtime turns its [`Choice`] into a decision
//! that the world commits later.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use township_core::config::PolicyKind;
use township_core::persona::AgentPersona;
use township_core::retrieval::RetrievalResult;
use township_core::schedule::{ResolvedActivity, ScheduleOverride};
use township_core::types::{AgentId, Position, SpatialId};

/// Activity label used by [`Sociable`] while talking.
pub const CHATTING: &str = "chatting";

/// Another agent inside the perception radius.
#[derive(Debug, Clone, PartialEq)]
pub struct PerceivedAgent {
    /// Who.
    pub id: AgentId,
    /// Display name.
    pub name: String,
    /// Distance from the perceiving agent.
    pub distance: f32,
    /// Their published activity.
    pub activity: String,
    /// Their published location.
    pub location: SpatialId,
}

/// Output of the Perceiving phase.
#[derive(Debug, Clone, Default)]
pub struct Perception {
    /// Where the agent stands.
    pub position: Position,
    /// The node the agent stands at, if any.
    pub located_at: Option<SpatialId>,
    /// Positioned locations within the perception radius, nearest first.
    pub nearby_locations: Vec<SpatialId>,
    /// Other agents within the perception radius, nearest first.
    pub nearby_agents: Vec<PerceivedAgent>,
    /// Memories relevant to the situation, best first.
    pub recalled: Vec<RetrievalResult>,
}

/// Everything a policy may look at.
#[derive(Debug)]
pub struct PolicyInput<'a> {
    /// The deciding agent.
    pub persona: &'a AgentPersona,
    /// Schedule (or override) output for now.
    pub planned: &'a ResolvedActivity,
    /// Perceiving output.
    pub perception: &'a Perception,
    /// Outgoing affinity row.
    pub affinity: &'a BTreeMap<AgentId, f64>,
    /// Agents that came within interaction range this tick.
    pub newly_met: &'a BTreeSet<AgentId>,
    /// Co-location distance.
    pub interaction_radius: f32,
    /// Simulated seconds per tick.
    pub step_secs: u64,
}

/// What the agent will do this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    /// Activity label.
    pub activity: String,
    /// Where to head.
    pub location: SpatialId,
    /// Agent to interact with, if any.
    pub interact_with: Option<AgentId>,
    /// Schedule override to install at commit.
    pub schedule_override: Option<ScheduleOverride>,
}

impl Choice {
    /// Do whatever the schedule says, alone.
    #[must_use]
    pub fn follow(planned: &ResolvedActivity) -> Self {
        Self {
            activity: planned.activity.clone(),
            location: planned.location.clone(),
            interact_with: None,
            schedule_override: None,
        }
    }
}

/// Pluggable decision strategy.
pub trait DecisionPolicy: Send + Sync + fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Pick an action. Must be a pure function of `input`.
    fn choose(&self, input: &PolicyInput<'_>) -> Choice;
}

/// Build the policy selected in configuration.
#[must_use]
pub fn from_kind(kind: PolicyKind) -> Arc<dyn DecisionPolicy> {
    match kind {
        PolicyKind::ScheduleDriven => Arc::new(ScheduleDriven),
        PolicyKind::Sociable => Arc::new(Sociable),
    }
}

/// Follow the schedule; greet the best-liked agent that just came into range.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleDriven;

impl DecisionPolicy for ScheduleDriven {
    fn name(&self) -> &'static str {
        "schedule_driven"
    }

    fn choose(&self, input: &PolicyInput<'_>) -> Choice {
        let mut choice = Choice::follow(input.planned);
        // highest affinity wins, ties go to the smaller id
        choice.interact_with = input
            .newly_met
            .iter()
            .map(|id| (id, input.affinity.get(id).copied().unwrap_or(0.0)))
            .fold(None::<(&AgentId, f64)>, |best, (id, score)| match best {
                Some((_, b)) if b >= score => best,
                _ => Some((id, score)),
            })
            .map(|(id, _)| id.clone());
        choice
    }
}

/// Talk to whoever is nearest, dropping the schedule for a while.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sociable;

impl DecisionPolicy for Sociable {
    fn name(&self) -> &'static str {
        "sociable"
    }

    fn choose(&self, input: &PolicyInput<'_>) -> Choice {
        let Some(nearest) = input.perception.nearby_agents.first() else {
            return Choice::follow(input.planned);
        };
        Choice {
            activity: CHATTING.to_string(),
            location: nearest.location.clone(),
            interact_with: Some(nearest.id.clone()),
            schedule_override: Some(ScheduleOverride {
                activity: CHATTING.to_string(),
                location: nearest.location.clone(),
                priority: 1,
                duration_secs: input.step_secs.saturating_mul(2),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use township_core::schedule::ActivitySource;

    fn persona() -> AgentPersona {
        AgentPersona {
            id: "A1".into(),
            name: "Isabella".to_string(),
            age: 34,
            description: String::new(),
            traits: Vec::new(),
            schedule: Vec::new(),
            home: None,
            position: None,
            seed_memories: Vec::new(),
        }
    }

    fn planned() -> ResolvedActivity {
        ResolvedActivity {
            activity: "work".to_string(),
            location: "cafe".into(),
            source: ActivitySource::Schedule,
        }
    }

    fn perceived(id: &str, distance: f32) -> PerceivedAgent {
        PerceivedAgent {
            id: id.into(),
            name: id.to_string(),
            distance,
            activity: "study".to_string(),
            location: "library".into(),
        }
    }

    #[test]
    fn schedule_driven_greets_the_best_liked_newcomer() {
        let persona = persona();
        let planned = planned();
        let perception = Perception::default();
        let affinity = BTreeMap::from([(AgentId::from("B"), 0.4), (AgentId::from("C"), 0.4)]);
        let newly_met = BTreeSet::from([AgentId::from("B"), AgentId::from("C"), AgentId::from("D")]);
        let choice = ScheduleDriven.choose(&PolicyInput {
            persona: &persona,
            planned: &planned,
            perception: &perception,
            affinity: &affinity,
            newly_met: &newly_met,
            interaction_radius: 2.0,
            step_secs: 600,
        });
        assert_eq!(choice.activity, "work");
        assert_eq!(choice.interact_with, Some(AgentId::from("B")));
        assert!(choice.schedule_override.is_none());
    }

    #[test]
    fn sociable_chats_with_the_nearest_agent() {
        let persona = persona();
        let planned = planned();
        let perception = Perception {
            nearby_agents: vec![perceived("B", 1.0), perceived("C", 4.0)],
            ..Perception::default()
        };
        let input = PolicyInput {
            persona: &persona,
            planned: &planned,
            perception: &perception,
            affinity: &BTreeMap::new(),
            newly_met: &BTreeSet::new(),
            interaction_radius: 2.0,
            step_secs: 600,
        };
        let choice = Sociable.choose(&input);
        assert_eq!(choice.activity, CHATTING);
        assert_eq!(choice.location, SpatialId::from("library"));
        assert_eq!(choice.interact_with, Some(AgentId::from("B")));
        assert_eq!(choice.schedule_override.map(|o| o.duration_secs), Some(1_200));
    }

    #[test]
    fn sociable_alone_follows_the_schedule() {
        let persona = persona();
        let planned = planned();
        let perception = Perception::default();
        let choice = Sociable.choose(&PolicyInput {
            persona: &persona,
            planned: &planned,
            perception: &perception,
            affinity: &BTreeMap::new(),
            newly_met: &BTreeSet::new(),
            interaction_radius: 2.0,
            step_secs: 600,
        });
        assert_eq!(choice, Choice::follow(&planned));
    }
}
