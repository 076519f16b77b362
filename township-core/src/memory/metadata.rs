//! Memory metadata: an open key-value bag with a small set of documented keys.
//!
//! Retrieval never reads metadata; relevance is computed from content alone.
//! The keys below are the ones the agent runtime writes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Location id where the memory was formed.
pub const LOCATION: &str = "location";
/// Activity the agent was doing.
pub const ACTIVITY: &str = "activity";
/// Other agents involved.
pub const PARTICIPANTS: &str = "participants";
/// Memory ids a reflection was derived from.
pub const CITATIONS: &str = "citations";
/// Tick number at which the memory was committed.
pub const TICK: &str = "tick";

/// Metadata bag attached to a memory entry.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A single metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// Boolean flag.
    Flag(bool),
    /// Numeric value.
    Number(f64),
    /// Free text or an id.
    Text(String),
    /// A list of ids.
    Ids(Vec<String>),
}

impl MetadataValue {
    /// The text payload, if this is a `Text` value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The list payload, if this is an `Ids` value.
    #[must_use]
    pub fn as_ids(&self) -> Option<&[String]> {
        match self {
            Self::Ids(ids) => Some(ids),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<u64> for MetadataValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: u64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<Vec<String>> for MetadataValue {
    fn from(value: Vec<String>) -> Self {
        Self::Ids(value)
    }
}
