//! Exponential backoff between reconnection attempts.
//!
//! The delay starts at a floor, grows by a multiplier after every failed
//! attempt and is clamped to a ceiling:
//!
//! ```text
//! delay[n] = min(floor * multiplier^(n-1), ceiling)
//! ```
//!
//! With the defaults (floor 1s, ceiling 60s, multiplier 2.0):
//! 1s, 2s, 4s, 8s, 16s, 32s, 60s, 60s, ...
//!
//! The schedule never runs out. An edge device has nothing better to do than
//! keep trying, and everything it produces meanwhile goes to the spool.
//!
//! # Examples
//!
//! ```ignore
//! use std::time::Duration;
//! use edgewatch_mqtt::backoff::Backoff;
//!
//! let mut backoff = Backoff::default();
//! assert_eq!(backoff.next_sleep(), Duration::from_secs(1));
//! assert_eq!(backoff.next_sleep(), Duration::from_secs(2));
//!
//! backoff.reset();
//! assert_eq!(backoff.next_sleep(), Duration::from_secs(1));
//! ```

use std::time::Duration;

/// Exponential backoff controller for connection retry logic.
///
/// Each call to [`Backoff::next_sleep`] returns the current delay and advances
/// the schedule. [`Backoff::reset`] is called once the broker accepts us again.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Delay returned for the first retry after a reset.
    min_delay: Duration,

    /// Delay that will be returned by the next call.
    current_delay: Duration,

    /// Upper bound for any delay.
    max_delay: Duration,

    /// Growth factor applied after each attempt.
    multiplier: f64,

    /// Attempts since the last reset.
    attempt: u32,
}

impl Backoff {
    /// Creates a backoff schedule.
    ///
    /// A `min` above `max` is clamped down to `max`, and a multiplier below
    /// 1.0 is treated as 1.0 (constant delay).
    pub fn new(min: Duration, max: Duration, multiplier: f64) -> Self {
        let min = min.min(max);
        let multiplier = if multiplier.is_finite() && multiplier >= 1.0 {
            multiplier
        } else {
            1.0
        };
        Self {
            min_delay: min,
            current_delay: min,
            max_delay: max,
            multiplier,
            attempt: 0,
        }
    }

    /// Resets the schedule to the floor.
    pub fn reset(&mut self) {
        self.current_delay = self.min_delay;
        self.attempt = 0;
    }

    /// Returns the next sleep duration and advances the schedule.
    pub fn next_sleep(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let sleep = self.current_delay;

        let next = self.current_delay.as_secs_f64() * self.multiplier;
        self.current_delay = if next >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(next)
        };

        sleep
    }

    /// Jumps straight to the ceiling.
    ///
    /// Used for refusals that retrying will not fix quickly (bad credentials,
    /// TLS mismatch): we keep trying, but slowly.
    pub fn saturate(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.current_delay = self.max_delay;
        self.max_delay
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Attempts since the last reset. Useful for logging.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }
}

impl Default for Backoff {
    /// Floor 1s, ceiling 60s, doubling.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 2.0)
    }
}
