//! Core type definitions for the township simulation.
//!
//! Identity newtypes, simulated time and planar positions. Everything here is
//! serializable so world definitions and snapshots can round-trip through
//! JSON/TOML unchanged.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::TownError;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Identifier of an agent (persona) in the world, e.g. `"A1"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    /// Create an agent id from anything string-like.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a node in the spatial hierarchy, e.g. `"cafe.kitchen"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpatialId(pub String);

impl SpatialId {
    /// Create a spatial id from anything string-like.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SpatialId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SpatialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a memory entry.
///
/// Allocated monotonically by the memory store, so a smaller id is always an
/// earlier append. Retrieval uses this as the final tie-break.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MemoryId(pub u64);

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Simulated seconds in one simulated day.
pub const SECS_PER_DAY: u64 = 86_400;

/// Simulated seconds in one simulated hour.
pub const SECS_PER_HOUR: u64 = 3_600;

/// A point in simulated time, measured in seconds since world start.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SimTime(pub u64);

impl SimTime {
    /// World start.
    pub const ZERO: Self = Self(0);

    /// Build a time from a day index and a time of day.
    #[must_use]
    pub fn at(day: u64, time: TimeOfDay) -> Self {
        Self(day * SECS_PER_DAY + u64::from(time.minutes()) * 60)
    }

    /// Seconds since world start.
    #[must_use]
    pub fn secs(self) -> u64 {
        self.0
    }

    /// Simulated hours elapsed since `earlier`. Zero if `earlier` is in the future.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hours_since(self, earlier: Self) -> f64 {
        self.0.saturating_sub(earlier.0) as f64 / SECS_PER_HOUR as f64
    }

    /// Zero-based simulated day index.
    #[must_use]
    pub fn day(self) -> u64 {
        self.0 / SECS_PER_DAY
    }

    /// Time within the current simulated day.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn time_of_day(self) -> TimeOfDay {
        // always < 1440, fits in u16
        TimeOfDay(((self.0 % SECS_PER_DAY) / 60) as u16)
    }

    /// Advance by `secs` seconds.
    #[must_use]
    pub fn plus_secs(self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "day {} {}", self.day(), self.time_of_day())
    }
}

/// A point in the simulated day, stored as minutes since midnight.
///
/// Serialized as `"HH:MM"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    /// Minutes in a simulated day.
    pub const MINUTES_PER_DAY: u16 = 1_440;

    /// Construct from hours and minutes.
    ///
    /// # Errors
    /// Returns [`TownError::Config`] if the values are out of range.
    pub fn hm(hours: u16, minutes: u16) -> crate::error::Result<Self> {
        if hours >= 24 || minutes >= 60 {
            return Err(TownError::Config(format!(
                "time of day out of range: {hours:02}:{minutes:02}"
            )));
        }
        Ok(Self(hours * 60 + minutes))
    }

    /// Minutes since midnight.
    #[must_use]
    pub fn minutes(self) -> u16 {
        self.0
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl FromStr for TimeOfDay {
    type Err = TownError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || TownError::Config(format!("malformed time of day: {s:?}"));
        let (h, m) = s.trim().split_once(':').ok_or_else(malformed)?;
        let hours: u16 = h.parse().map_err(|_| malformed())?;
        let minutes: u16 = m.parse().map_err(|_| malformed())?;
        Self::hm(hours, minutes)
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Spatial
// ---------------------------------------------------------------------------

/// A 2D position in the town.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate.
    pub y: f32,
}

impl Position {
    /// Create a new position.
    #[must_use]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    #[must_use]
    pub fn distance(&self, other: &Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Move towards `target` by at most `max_step` units.
    #[must_use]
    pub fn step_towards(&self, target: &Self, max_step: f32) -> Self {
        let dist = self.distance(target);
        if dist <= max_step || dist < f32::EPSILON {
            return *target;
        }
        let t = max_step / dist;
        Self {
            x: self.x + (target.x - self.x) * t,
            y: self.y + (target.y - self.y) * t,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1})", self.x, self.y)
    }
}

// ---------------------------------------------------------------------------
// Retrieval Score
// ---------------------------------------------------------------------------

/// Composite score used to rank memories during retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RetrievalScore(pub OrderedFloat<f64>);

impl RetrievalScore {
    /// Create a retrieval score from a raw f64.
    #[must_use]
    pub fn new(score: f64) -> Self {
        Self(OrderedFloat(score))
    }

    /// Get the raw score value.
    #[must_use]
    pub fn value(self) -> f64 {
        self.0.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_of_day_parses_and_prints() {
        let t: TimeOfDay = "08:30".parse().expect("valid");
        assert_eq!(t.minutes(), 510);
        assert_eq!(t.to_string(), "08:30");
        assert!("24:00".parse::<TimeOfDay>().is_err());
        assert!("8h30".parse::<TimeOfDay>().is_err());
    }

    #[test]
    fn sim_time_splits_into_day_and_time() {
        let t = SimTime::at(2, TimeOfDay::hm(23, 15).expect("valid"));
        assert_eq!(t.day(), 2);
        assert_eq!(t.time_of_day().to_string(), "23:15");
        assert!((t.plus_secs(5_400).hours_since(t) - 1.5).abs() < 1e-9);
        assert_eq!(SimTime::ZERO.hours_since(t), 0.0);
    }

    #[test]
    fn step_towards_never_overshoots() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(10.0, 0.0);
        let mid = a.step_towards(&b, 4.0);
        assert!((mid.x - 4.0).abs() < 1e-5);
        assert_eq!(a.step_towards(&b, 50.0), b);
    }
}
