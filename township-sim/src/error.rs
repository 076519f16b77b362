//! Error types for the simulation loop.

use thiserror::Error;
use township_core::TownError;
use township_core::types::AgentId;

/// Errors raised while initialising or ticking a world.
#[derive(Error, Debug)]
pub enum SimError {
    /// A core operation failed.
    #[error(transparent)]
    Core(#[from] TownError),

    /// A runtime's decide phase ran past its wall-clock budget.
    #[error("decide phase for {agent} exceeded {timeout_ms}ms")]
    DecideTimeout {
        /// The runtime that stalled.
        agent: AgentId,
        /// The budget it exceeded.
        timeout_ms: u64,
    },

    /// A decide task panicked or was aborted.
    #[error("decide task for {agent} failed: {reason}")]
    TaskFailed {
        /// The runtime whose task failed.
        agent: AgentId,
        /// Join error description.
        reason: String,
    },

    /// Shutdown was requested mid-tick; nothing from that tick was committed.
    #[error("tick {tick} cancelled, pending decisions discarded")]
    Cancelled {
        /// The tick that was abandoned.
        tick: u64,
    },

    /// Every runtime has failed.
    #[error("no live agents remain")]
    NoLiveAgents,
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, SimError>;
