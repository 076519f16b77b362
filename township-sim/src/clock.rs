//! Simulated time keeping and per-tick reports.

use township_core::config::{ClockConfig, DecayConfig};
use township_core::memory::DecayReport;
use township_core::types::{AgentId, SimTime};

/// Tick counter plus simulated time.
///
/// Time only moves in whole steps, and only after a tick's commit phase has
/// finished, so every runtime sees the same `now` for the whole tick.
#[derive(Debug, Clone)]
pub struct WorldClock {
    tick: u64,
    now: SimTime,
    step_secs: u64,
    decay_every: u64,
}

impl WorldClock {
    /// A clock at tick 0 and the configured start time.
    #[must_use]
    pub fn new(clock: &ClockConfig, decay: &DecayConfig) -> Self {
        Self {
            tick: 0,
            now: SimTime(clock.start_secs),
            step_secs: clock.step_secs,
            decay_every: decay.every_ticks,
        }
    }

    /// Ticks completed so far.
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Current simulated time.
    #[must_use]
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Simulated seconds per tick.
    #[must_use]
    pub fn step_secs(&self) -> u64 {
        self.step_secs
    }

    /// Move to the next tick; returns the new time.
    pub fn advance(&mut self) -> SimTime {
        self.tick += 1;
        self.now = self.now.plus_secs(self.step_secs);
        self.now
    }

    /// Whether the tick just completed should run a decay pass.
    /// A cadence of zero disables periodic decay.
    #[must_use]
    pub fn decay_due(&self) -> bool {
        self.decay_every > 0 && self.tick > 0 && self.tick % self.decay_every == 0
    }
}

/// Summary broadcast after every completed tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// The tick that completed (1-based).
    pub tick: u64,
    /// Simulated time the tick was decided at.
    pub decided_at: SimTime,
    /// Simulated time after the tick.
    pub time: SimTime,
    /// Runtimes whose decisions were committed.
    pub committed: usize,
    /// Memories appended during commit.
    pub memories_appended: usize,
    /// Runtimes that failed during this tick.
    pub failed: Vec<AgentId>,
    /// Decay pass result, if one ran.
    pub decay: Option<DecayReport>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_in_whole_steps() {
        let mut clock = WorldClock::new(
            &ClockConfig {
                step_secs: 600,
                start_secs: 0,
            },
            &DecayConfig {
                every_ticks: 3,
                ..DecayConfig::default()
            },
        );
        assert!(!clock.decay_due());
        assert_eq!(clock.advance(), SimTime(600));
        assert!(!clock.decay_due());
        clock.advance();
        assert_eq!(clock.advance(), SimTime(1_800));
        assert_eq!(clock.tick(), 3);
        assert!(clock.decay_due());
    }

    #[test]
    fn zero_cadence_never_decays() {
        let mut clock = WorldClock::new(
            &ClockConfig::default(),
            &DecayConfig {
                every_ticks: 0,
                ..DecayConfig::default()
            },
        );
        for _ in 0..10 {
            clock.advance();
            assert!(!clock.decay_due());
        }
        assert_eq!(clock.now(), SimTime(8 * 3_600 + 6_000));
    }
}
