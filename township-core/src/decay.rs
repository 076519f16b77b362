//! Importance decay for idle memories.
//!
//! A memory that has not been recalled for longer than
//! `idle_threshold_hours` loses importance exponentially:
//!
//!   importance ← importance · e^(-rate · idle_hours)
//!
//! `decayed_through` on each entry records how far decay has already been
//! applied, so running the pass twice at the same instant is a no-op and
//! running it in many small steps compounds to the same result as one big
//! step. Importance never increases and never drops below zero.

use crate::config::DecayConfig;
use crate::memory::MemoryEntry;
use crate::types::{SECS_PER_HOUR, SimTime};

/// Apply decay to one entry. Returns the importance lost.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn decay_entry(entry: &mut MemoryEntry, now: SimTime, config: &DecayConfig) -> f64 {
    let threshold_secs = (config.idle_threshold_hours.max(0.0) * SECS_PER_HOUR as f64) as u64;
    let idle_start = entry.last_accessed_at.plus_secs(threshold_secs);
    let from = entry.decayed_through.map_or(idle_start, |d| d.max(idle_start));
    if now <= from {
        return 0.0;
    }

    let idle_hours = now.hours_since(from);
    let before = entry.importance;
    let after = retention(before, idle_hours, config.importance_rate_per_hour);
    entry.importance = after;
    entry.decayed_through = Some(now);
    before - after
}

/// `importance · e^(-rate · hours)`, floored at zero.
#[must_use]
pub fn retention(importance: f64, hours: f64, rate: f64) -> f64 {
    if importance <= 0.0 {
        return 0.0;
    }
    (importance * (-rate.max(0.0) * hours.max(0.0)).exp()).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryKind, Metadata};
    use crate::types::MemoryId;

    fn entry(importance: f64) -> MemoryEntry {
        MemoryEntry {
            id: MemoryId(1),
            agent_id: "A1".into(),
            content: "met Ben".to_string(),
            created_at: SimTime(0),
            last_accessed_at: SimTime(0),
            importance,
            kind: MemoryKind::Interaction,
            metadata: Metadata::new(),
            decayed_through: None,
        }
    }

    fn config() -> DecayConfig {
        DecayConfig {
            idle_threshold_hours: 10.0,
            importance_rate_per_hour: 0.1,
            ..DecayConfig::default()
        }
    }

    #[test]
    fn fresh_memories_do_not_decay() {
        let mut e = entry(5.0);
        assert_eq!(decay_entry(&mut e, SimTime(9 * 3_600), &config()), 0.0);
        assert!((e.importance - 5.0).abs() < f64::EPSILON);
        assert!(e.decayed_through.is_none());
    }

    #[test]
    fn idle_memories_lose_importance_once_per_instant() {
        let mut e = entry(5.0);
        let now = SimTime(20 * 3_600);
        let lost = decay_entry(&mut e, now, &config());
        assert!(lost > 0.0);
        let expected = 5.0 * (-1.0_f64).exp();
        assert!((e.importance - expected).abs() < 1e-9);

        // same instant again: nothing changes
        assert_eq!(decay_entry(&mut e, now, &config()), 0.0);
        assert!((e.importance - expected).abs() < 1e-9);
    }

    #[test]
    fn stepwise_decay_matches_single_step() {
        let mut stepwise = entry(8.0);
        for h in 11..=30 {
            decay_entry(&mut stepwise, SimTime(h * 3_600), &config());
        }
        let mut single = entry(8.0);
        decay_entry(&mut single, SimTime(30 * 3_600), &config());
        assert!((stepwise.importance - single.importance).abs() < 1e-9);
    }

    #[test]
    fn recall_resets_the_idle_clock() {
        let mut e = entry(5.0);
        decay_entry(&mut e, SimTime(20 * 3_600), &config());
        let after_first = e.importance;
        e.record_access(SimTime(20 * 3_600));
        decay_entry(&mut e, SimTime(25 * 3_600), &config());
        assert!((e.importance - after_first).abs() < f64::EPSILON);
    }

    #[test]
    fn retention_never_negative() {
        assert_eq!(retention(0.0, 100.0, 1.0), 0.0);
        assert!(retention(1.0, 1e9, 1.0) >= 0.0);
        assert!((retention(2.0, 5.0, 0.0) - 2.0).abs() < f64::EPSILON);
    }
}
