//! Exponential backoff for connection retry scheduling.
//!
//! When a connect attempt fails, rather than immediately retrying (which can
//! overwhelm a recovering broker), the supervisor waits an increasing amount
//! of time between attempts:
//!
//! ```text
//! delay[n] = min(initial * multiplier^(n-1), ceiling)
//! ```
//!
//! The schedule resets on every successful connect, so the next failure
//! starts again from the initial interval. By default there is **no attempt
//! limit**: retries continue indefinitely, trading fail-fast for
//! availability. Loops that must be bounded (such as remote channel
//! creation) opt in via [`Backoff::set_max_attempts`].
//!
//! The scheduler is a pure function over its own state plus configuration
//! (no I/O, no clocks), which keeps it fully unit-testable.

use std::time::Duration;

use rand::Rng;
use thiserror::Error;

use crate::config::BackoffConfig;

/// Error type for backoff exhaustion.
///
/// Only produced when an explicit attempt limit was configured via
/// [`Backoff::set_max_attempts`]; the default policy never exhausts.
#[derive(Debug, Error)]
pub enum BackoffError {
    /// Maximum retry attempts exceeded with the given limit.
    #[error("maximum number of attempts exceeded: {0}")]
    MaxAttemptsExceeded(u32),
}

/// Exponential backoff controller for connection retry logic.
///
/// Each call to [`Backoff::next_sleep`] returns the current delay and
/// advances the schedule; [`Backoff::reset`] is called on every successful
/// connect so the sequence starts over.
///
/// The delay sequence is monotonically non-decreasing up to the configured
/// ceiling. With a non-zero jitter fraction the returned value is perturbed
/// by up to `±jitter * delay`, still clamped to the ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// The initial delay before the first retry.
    initial_delay: Duration,

    /// The delay the next `next_sleep()` call will base its result on.
    current_delay: Duration,

    /// Ceiling on the delay (prevents unbounded growth).
    max_delay: Duration,

    /// Multiplicative growth factor applied after each attempt (> 1.0).
    multiplier: f64,

    /// Jitter fraction in `0.0..=1.0`; 0.0 disables jitter.
    jitter: f64,

    /// Count of attempts handed out since the last reset.
    attempt: u32,

    /// Optional hard limit on attempts. `None` (the default) retries forever.
    max_attempts: Option<u32>,
}

impl Backoff {
    /// Creates a backoff controller with explicit timing parameters and no
    /// jitter or attempt limit.
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay: initial,
            current_delay: initial,
            max_delay: max,
            multiplier,
            jitter: 0.0,
            attempt: 0,
            max_attempts: None,
        }
    }

    /// Creates a backoff controller from a validated [`BackoffConfig`].
    pub fn from_config(config: &BackoffConfig) -> Self {
        let mut backoff = Self::new(
            Duration::from_millis(config.initial_ms),
            Duration::from_millis(config.max_ms),
            config.multiplier,
        );
        backoff.jitter = config.jitter;
        backoff.max_attempts = config.max_attempts;
        backoff
    }

    /// Sets an explicit maximum number of attempts.
    ///
    /// Past the limit, [`Backoff::next_sleep`] returns
    /// [`BackoffError::MaxAttemptsExceeded`]. Used by bounded loops such as
    /// remote channel creation; connection retries leave this unset.
    pub fn set_max_attempts(&mut self, max: u32) {
        self.max_attempts = Some(max);
    }

    /// Resets the schedule to its initial state.
    ///
    /// Called on every successful connect so the next failure starts with
    /// the minimum delay again.
    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
        self.attempt = 0;
    }

    /// Returns the next sleep duration and advances the schedule.
    ///
    /// # Errors
    ///
    /// Returns [`BackoffError::MaxAttemptsExceeded`] only when an explicit
    /// attempt limit was configured and has been reached.
    pub fn next_sleep(&mut self) -> Result<Duration, BackoffError> {
        if let Some(max) = self.max_attempts {
            if self.attempt >= max {
                return Err(BackoffError::MaxAttemptsExceeded(max));
            }
        }
        self.attempt += 1;

        let sleep = self.current_delay;

        let next_secs = self.current_delay.as_secs_f64() * self.multiplier;
        self.current_delay = Duration::from_secs_f64(next_secs).min(self.max_delay);

        Ok(self.apply_jitter(sleep))
    }

    /// Perturbs `delay` by up to `±jitter * delay`, clamped to the ceiling.
    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        let jittered = delay.as_secs_f64() * (1.0 + spread);
        Duration::from_secs_f64(jittered.max(0.0)).min(self.max_delay)
    }

    /// Number of attempts handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The configured delay ceiling.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// The explicit attempt limit, if one was set.
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}

impl Default for Backoff {
    /// Sensible defaults for wide-area transports: 1s initial, 60s ceiling,
    /// doubling per attempt, unlimited retries.
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_default_creation() {
        let backoff = Backoff::default();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.current_delay, Duration::from_secs(1));
        assert_eq!(backoff.max_delay(), Duration::from_secs(60));
        assert!(backoff.max_attempts().is_none());
    }

    #[test]
    fn test_backoff_doubling_sequence_capped() {
        // Concrete schedule: 50ms initial, 500ms ceiling, doubling.
        let mut backoff = Backoff::new(
            Duration::from_millis(50),
            Duration::from_millis(500),
            2.0,
        );

        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_millis(50));
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_millis(100));
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_millis(200));
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_millis(400));
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_millis(500));
        // Saturated at the ceiling.
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_reset_returns_to_initial() {
        let mut backoff = Backoff::new(
            Duration::from_millis(50),
            Duration::from_millis(500),
            2.0,
        );
        backoff.next_sleep().unwrap();
        backoff.next_sleep().unwrap();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_millis(50));
    }

    #[test]
    fn test_backoff_unlimited_by_default() {
        let mut backoff = Backoff::new(
            Duration::from_millis(1),
            Duration::from_millis(2),
            2.0,
        );
        for _ in 0..10_000 {
            assert!(backoff.next_sleep().is_ok());
        }
    }

    #[test]
    fn test_backoff_max_attempts_exceeded() {
        let mut backoff = Backoff::default();
        backoff.set_max_attempts(2);

        assert!(backoff.next_sleep().is_ok());
        assert!(backoff.next_sleep().is_ok());
        let result = backoff.next_sleep();
        assert!(result.is_err());
        if let Err(BackoffError::MaxAttemptsExceeded(max)) = result {
            assert_eq!(max, 2);
        }
    }

    #[test]
    fn test_backoff_jitter_stays_within_bounds() {
        let mut backoff = Backoff::new(
            Duration::from_millis(100),
            Duration::from_millis(500),
            2.0,
        );
        backoff.jitter = 0.5;

        for _ in 0..100 {
            let delay = backoff.next_sleep().unwrap();
            assert!(delay <= Duration::from_millis(500));
        }
    }

    #[test]
    fn test_backoff_monotonic_without_jitter() {
        let mut backoff = Backoff::new(
            Duration::from_millis(10),
            Duration::from_millis(300),
            1.5,
        );
        let mut last = Duration::ZERO;
        for _ in 0..20 {
            let delay = backoff.next_sleep().unwrap();
            assert!(delay >= last);
            last = delay;
        }
    }

    #[test]
    fn test_backoff_from_config() {
        let config = BackoffConfig {
            initial_ms: 50,
            max_ms: 500,
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts: Some(3),
        };
        let mut backoff = Backoff::from_config(&config);
        assert_eq!(backoff.next_sleep().unwrap(), Duration::from_millis(50));
        assert_eq!(backoff.max_attempts(), Some(3));
    }
}
