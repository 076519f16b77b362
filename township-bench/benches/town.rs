//! Township benchmark suite
//!
//! Budgets:
//!   memory_append_single ............. < 10μs
//!   memory_retrieval_top5_from_200 ... < 500μs
//!   memory_decay_pass_50_agents ...... < 100μs
//!   world_tick_20_agents ............. < 5ms

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use township_core::config::TownConfig;
use township_core::loader::WorldDefinition;
use township_core::memory::{MemoryStore, NewMemory, QueryContext};
use township_core::persona::{AgentPersona, ScheduleItem};
use township_core::spatial::{SpatialKind, SpatialNode};
use township_core::types::{AgentId, Position, SimTime, TimeOfDay};
use township_sim::World;

const TOPICS: [&str; 5] = ["coffee", "library", "election", "garden", "painting"];

fn store_with(agents: u32, per_agent: u32) -> (MemoryStore, Vec<AgentId>) {
    let store = MemoryStore::new(&TownConfig::default());
    let ids: Vec<AgentId> = (0..agents).map(|a| AgentId::new(format!("agent-{a}"))).collect();
    for agent in &ids {
        store.register_agent(agent.clone());
        for i in 0..per_agent {
            let topic = TOPICS[i as usize % TOPICS.len()];
            store
                .append(
                    NewMemory::observation(
                        agent.clone(),
                        format!("Event {i} about the {topic} happened in the town square"),
                        f64::from(i % 10 + 1),
                    ),
                    SimTime(u64::from(i) * 60),
                )
                .expect("append");
        }
    }
    (store, ids)
}

fn bench_append(c: &mut Criterion) {
    let (store, ids) = store_with(1, 0);
    let agent = ids[0].clone();
    let mut t = 0u64;
    c.bench_function("memory_append_single", |b| {
        b.iter(|| {
            t += 1;
            let id = store
                .append(
                    NewMemory::observation(agent.clone(), black_box("Saw Bob near the cafe"), 3.0),
                    SimTime(t),
                )
                .expect("append");
            black_box(id);
        });
    });
}

fn bench_retrieval(c: &mut Criterion) {
    let (store, ids) = store_with(1, 200);
    let query = QueryContext::new("what happened with the election at the library");
    let now = SimTime(200 * 60);
    c.bench_function("memory_retrieval_top5_from_200", |b| {
        b.iter(|| {
            let results = store
                .peek_scored(black_box(&ids[0]), black_box(&query), 5, now)
                .expect("retrieve");
            black_box(results);
        });
    });
}

fn bench_decay(c: &mut Criterion) {
    let (store, _) = store_with(50, 20);
    let mut now = SimTime(86_400);
    c.bench_function("memory_decay_pass_50_agents", |b| {
        b.iter(|| {
            now = now.plus_secs(3_600);
            black_box(store.decay_all(black_box(now)));
        });
    });
}

fn town_of(agents: u32) -> WorldDefinition {
    let mut locations = vec![SpatialNode::new(
        "ville",
        "Ville",
        SpatialKind::Town,
        None,
        Some(Position::new(0.0, 0.0)),
    )];
    for b in 0..5u8 {
        let x = f32::from(b) * 6.0;
        locations.push(SpatialNode::new(
            format!("building-{b}"),
            format!("Building {b}"),
            SpatialKind::Building,
            Some("ville"),
            Some(Position::new(x, 4.0)),
        ));
    }
    let personas = (0..agents)
        .map(|a| {
            let morning = format!("building-{}", a % 5);
            let noon = format!("building-{}", (a + 2) % 5);
            AgentPersona {
                id: AgentId::new(format!("agent-{a}")),
                name: format!("Agent {a}"),
                age: 20 + a,
                description: String::new(),
                traits: Vec::new(),
                schedule: vec![
                    ScheduleItem::new(TimeOfDay::hm(8, 0).expect("time"), "working", morning),
                    ScheduleItem::new(TimeOfDay::hm(12, 0).expect("time"), "lunch", noon),
                ],
                home: Some("ville".into()),
                position: None,
                seed_memories: Vec::new(),
            }
        })
        .collect();
    WorldDefinition { personas, locations }
}

fn bench_tick(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let mut world = World::init(town_of(20), TownConfig::default()).expect("world");
    c.bench_function("world_tick_20_agents", |b| {
        b.iter(|| {
            let report = rt.block_on(world.tick()).expect("tick");
            black_box(report);
        });
    });
}

criterion_group!(benches, bench_append, bench_retrieval, bench_decay, bench_tick);
criterion_main!(benches);
