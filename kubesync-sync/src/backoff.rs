//! Retry delay between reconciliation cycles.
//!
//! Only source failures grow the delay. Sink failures and channel closures
//! put it back at the floor.

use std::time::Duration;

pub const DEFAULT_MIN: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX: Duration = Duration::from_secs(30);

/// Owned retry state for one worker. Not persisted across restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_MIN, DEFAULT_MAX)
    }
}

impl Backoff {
    /// `max` below `min` is raised to `min`.
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
        }
    }

    /// The delay the next wait would use.
    pub fn delay(&self) -> Duration {
        self.current
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Progress was made, the channel closed, or the sink failed: back to the floor.
    pub fn reset(&mut self) {
        self.current = self.min;
    }

    /// Returns the wait to use now and doubles the delay for the next
    /// source failure, capped at `max`.
    pub fn on_source_failure(&mut self) -> Duration {
        let wait = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        wait
    }
}
