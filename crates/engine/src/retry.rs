//! Retry policy and time source for managed transactions

use arbor_core::{DriverError, DriverResult};
use parking_lot::Mutex;
use rand::Rng;
use std::time::{Duration, Instant};

// ============================================================================
// Clock
// ============================================================================

/// Time source used for backoff waits and routing expiry
///
/// Production code uses [`SystemClock`]; tests inject a [`ManualClock`] so
/// backoff never sleeps for real and every wait can be inspected.
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;

    /// Block the calling thread for `duration`
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `std::thread::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock that only moves when told to
///
/// `sleep` returns immediately, advances the clock and records the
/// requested duration.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Create a clock frozen at the current instant
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Move time forward without recording a sleep
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    /// Every duration passed to `sleep`, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    /// Total time elapsed since creation
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.elapsed.lock()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        self.advance(duration);
    }
}

// ============================================================================
// Retry Configuration
// ============================================================================

/// Backoff policy for managed transactions
///
/// The delay before retry `n` (0-based) is
/// `initial_delay * multiplier^n`, spread by a random factor in
/// `[1 - jitter, 1 + jitter]` and capped at `max_delay`. Retrying stops as
/// soon as the next wait would push the total time past `max_retry_time`.
///
/// With `jitter < (multiplier - 1) / (multiplier + 1)` consecutive delays
/// grow strictly even in the worst case; the defaults (2.0, 0.2) satisfy it.
///
/// # Example
/// ```ignore
/// let retry = RetryConfig::new()
///     .with_max_retry_time(Duration::from_secs(5))
///     .with_initial_delay(Duration::from_millis(50));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total time budget, measured from the first attempt
    pub max_retry_time: Duration,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Relative random spread, 0.0 for none
    pub jitter: f64,
    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retry_time: Duration::from_secs(30),
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.2,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Policy with the defaults of `arbor.toml`
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a RetryConfig that never retries
    pub fn no_retry() -> Self {
        Self {
            max_retry_time: Duration::ZERO,
            ..Default::default()
        }
    }

    /// Set the total retry budget
    pub fn with_max_retry_time(mut self, max_retry_time: Duration) -> Self {
        self.max_retry_time = max_retry_time;
        self
    }

    /// Set the first delay
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Set the growth factor
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set the jitter fraction
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the maximum single delay
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Check that delays grow and jitter is a usable fraction
    ///
    /// # Errors
    /// `InvalidConfig` if `multiplier` is below 1.0 or not a number, or
    /// `jitter` lies outside `[0.0, 1.0)`.
    pub fn validate(&self) -> DriverResult<()> {
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(DriverError::InvalidConfig {
                reason: "retry.multiplier must be at least 1.0".to_string(),
            });
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(DriverError::InvalidConfig {
                reason: "retry.jitter must be in [0.0, 1.0)".to_string(),
            });
        }
        Ok(())
    }

    /// Delay before retry `attempt`, without jitter
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        // Cap the exponent so the float stays finite
        let exponent = attempt.min(64) as i32;
        let nanos = self.initial_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        let capped = nanos.min(self.max_delay.as_nanos() as f64).max(0.0);
        Duration::from_nanos(capped.round() as u64)
    }

    /// Delay before retry `attempt` with jitter applied
    pub fn jittered_delay<R: Rng + ?Sized>(&self, attempt: usize, rng: &mut R) -> Duration {
        let base = self.calculate_delay(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let factor = 1.0 + rng.gen_range(-self.jitter..=self.jitter);
        let nanos = (base.as_nanos() as f64 * factor).min(self.max_delay.as_nanos() as f64);
        Duration::from_nanos(nanos.max(0.0).round() as u64)
    }
}
