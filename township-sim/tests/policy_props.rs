//! Property tests for the built-in decision policies.

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;

use township_core::persona::AgentPersona;
use township_core::schedule::{ActivitySource, ResolvedActivity};
use township_core::types::AgentId;
use township_sim::policy::{Perception, PolicyInput};
use township_sim::{DecisionPolicy, ScheduleDriven};

fn persona() -> AgentPersona {
    AgentPersona {
        id: "self".into(),
        name: "Self".to_string(),
        age: 30,
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
        activity: "gardening".to_string(),
        location: "garden".into(),
        source: ActivitySource::Schedule,
    }
}

fn arb_scores() -> impl Strategy<Value = BTreeMap<AgentId, f64>> {
    // a coarse grid so ties actually happen
    prop::collection::btree_map(
        "[a-f]".prop_map(AgentId::new),
        (-4i32..=4).prop_map(|n| f64::from(n) / 4.0),
        0..6,
    )
}

proptest! {
    #[test]
    fn schedule_driven_greets_best_liked_then_smallest_id(
        affinity in arb_scores(),
        extra in prop::collection::btree_set("[a-f]".prop_map(AgentId::new), 0..4),
    ) {
        let newly_met: BTreeSet<AgentId> = affinity.keys().cloned().chain(extra).collect();
        let persona = persona();
        let planned = planned();
        let perception = Perception::default();
        let choice = ScheduleDriven.choose(&PolicyInput {
            persona: &persona,
            planned: &planned,
            perception: &perception,
            affinity: &affinity,
            newly_met: &newly_met,
            interaction_radius: 2.0,
            step_secs: 600,
        });

        prop_assert_eq!(&choice.activity, &planned.activity);
        prop_assert_eq!(&choice.location, &planned.location);
        let score = |id: &AgentId| affinity.get(id).copied().unwrap_or(0.0);
        match choice.interact_with {
            None => prop_assert!(newly_met.is_empty()),
            Some(partner) => {
                prop_assert!(newly_met.contains(&partner));
                for other in &newly_met {
                    prop_assert!(score(other) <= score(&partner));
                    if (score(other) - score(&partner)).abs() < f64::EPSILON {
                        prop_assert!(partner <= *other);
                    }
                }
            }
        }
    }
}
