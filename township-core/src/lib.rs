//! # Township Core Library
//!
//! Engine-agnostic data model for a simulated town of autonomous agents.
//!
//! - **Spatial index**: the location forest (town → building → room → object)
//!   plus where every agent stands.
//! - **Memory store**: append-only per-agent memory streams, scored
//!   retrieval (recency, importance, relevance) and importance decay.
//! - **Affinity table**: directed, clamped relationship scores.
//! - **Schedule engine**: planned daily activity plus timed overrides.
//! - **Loader and persistence**: world definitions in, snapshots out.
//!
//! The agent runtime and world clock live in `township-sim`; nothing here
//! spawns tasks or knows about ticks.
//!
//! ## Performance Contract
//!
//! - Memory append: < 10μs
//! - Retrieval (top-5 of 200): < 500μs
//! - Decay pass (25 agents × 200 memories): < 1ms

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod affinity;
pub mod config;
pub mod decay;
pub mod error;
pub mod loader;
pub mod memory;
pub mod persistence;
pub mod persona;
pub mod retrieval;
pub mod schedule;
pub mod spatial;
pub mod types;

pub use affinity::{AffinityRecord, AffinityTable};
pub use config::TownConfig;
pub use error::{Result, TownError};
pub use loader::WorldDefinition;
pub use memory::{MemoryEntry, MemoryKind, MemoryStore, NewMemory, QueryContext};
pub use persistence::{InMemorySnapshotStore, SnapshotStore, SqliteSnapshotStore};
pub use persona::{AgentPersona, AgentState, ScheduleItem, SeedMemory};
pub use schedule::{ResolvedActivity, ScheduleEngine, ScheduleOverride};
pub use spatial::{SpatialIndex, SpatialKind, SpatialNode};
pub use types::*;
