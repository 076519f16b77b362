//! Error types for the township core library.

use thiserror::Error;

use crate::types::{AgentId, MemoryId, SpatialId};

/// Top-level error type for all core operations.
#[derive(Error, Debug)]
pub enum TownError {
    /// An id lookup did not resolve. Recoverable; the caller picks a fallback.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What was being looked up (`"location"`, `"memory"`, ...).
        kind: &'static str,
        /// The id that failed to resolve.
        id: String,
    },

    /// The spatial forest violates its structural invariants.
    #[error("Malformed hierarchy at node {node}: {reason}")]
    MalformedHierarchy {
        /// The offending node.
        node: SpatialId,
        /// What is wrong with it.
        reason: String,
    },

    /// A memory was appended for an agent the store does not know.
    #[error("Unknown agent: {0}")]
    UnknownAgent(AgentId),

    /// A score was negative or not finite.
    #[error("Invalid score: {0}")]
    InvalidScore(f64),

    /// A memory's timestamps are out of order or lie after the append time.
    #[error("Invalid timestamps for memory: created at {created}s, last accessed at {accessed}s")]
    InvalidTimestamps {
        /// Creation time in simulated seconds.
        created: u64,
        /// Last access time in simulated seconds.
        accessed: u64,
    },

    /// A caller-supplied memory id is already in use.
    #[error("Duplicate memory id: {0}")]
    DuplicateMemory(MemoryId),

    /// The persona has no schedule items.
    #[error("Persona {0} has an empty schedule")]
    EmptySchedule(AgentId),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TownError {
    /// Shorthand for a [`TownError::NotFound`].
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

impl From<serde_json::Error> for TownError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, TownError>;
