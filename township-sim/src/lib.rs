//! # township-sim: agent runtimes and the world clock
//!
//! Drives the engine-agnostic `township-core` components through discrete
//! ticks.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                    World                     │
//! │  ┌────────────┐   decide (parallel, read)    │
//! │  │ WorldClock │ ─────────────────────────┐   │
//! │  └────────────┘                          ▼   │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────┴───────┐
//! │  │ AgentRuntime │  │ AgentRuntime │  │ AgentRuntime │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘
//! │         └──── commit (sequential, id order) ─┘
//! │                          ▼                   │
//! │  ┌──────────────────────────────────────┐    │
//! │  │ WorldContext (township-core)         │    │
//! │  │ spatial · memory · affinity · schedule│   │
//! │  └──────────────────────────────────────┘    │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `world`: initialisation, the decide/commit tick, run loop, teardown
//! - `runtime`: per-agent state machine and decision materialisation
//! - `policy`: pluggable decision policies
//! - `clock`: simulated time and tick reports
//! - `snapshot`: read-only views for presentation layers
//! - `cli` / `commands`: the `township` binary

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod clock;
pub mod commands;
pub mod context;
pub mod error;
pub mod policy;
pub mod runtime;
pub mod snapshot;
pub mod world;

pub use cli::{Cli, Commands};
pub use clock::{TickReport, WorldClock};
pub use context::WorldContext;
pub use error::SimError;
pub use policy::{DecisionPolicy, ScheduleDriven, Sociable};
pub use runtime::{AgentPhase, AgentRuntime, Decision};
pub use snapshot::WorldSnapshot;
pub use world::{World, WorldBuilder};
