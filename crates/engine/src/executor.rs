//! The managed-transaction retry loop
//!
//! [`RetryExecutor`] knows nothing about sessions: it runs an attempt
//! closure, sorts failures with [`DriverError::is_retryable`], and waits out
//! the backoff between attempts. Everything an attempt needs (a fresh
//! transaction, commit, rollback) lives inside the closure.

use crate::retry::{Clock, RetryConfig};
use arbor_core::{DriverError, DriverResult};
use tracing::{debug, error, warn};

/// Runs attempts until one succeeds, one fails terminally, or the retry
/// budget is spent
pub struct RetryExecutor<'a> {
    config: &'a RetryConfig,
    clock: &'a dyn Clock,
}

impl<'a> RetryExecutor<'a> {
    /// Executor applying `config`, measuring time with `clock`
    pub fn new(config: &'a RetryConfig, clock: &'a dyn Clock) -> Self {
        Self { config, clock }
    }

    /// Run `attempt` (called with the 0-based attempt number) with retry
    ///
    /// # Errors
    /// - the first non-retryable error, unchanged
    /// - `RetryExhausted` carrying the last retryable error once the next
    ///   wait would exceed `max_retry_time`
    pub fn run<T, F>(&self, mut attempt: F) -> DriverResult<T>
    where
        F: FnMut(usize) -> DriverResult<T>,
    {
        let started = self.clock.now();
        let mut rng = rand::thread_rng();
        let mut n = 0usize;

        loop {
            let err = match attempt(n) {
                Ok(value) => {
                    if n > 0 {
                        debug!(target: "arbor::retry", attempts = n + 1, "Transaction succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => e,
            };

            let delay = self.config.jittered_delay(n, &mut rng);
            let elapsed = self.clock.now().saturating_duration_since(started);
            if elapsed + delay > self.config.max_retry_time {
                error!(
                    target: "arbor::retry",
                    attempts = n + 1,
                    ?elapsed,
                    error = %err,
                    "Retry budget exhausted"
                );
                return Err(DriverError::RetryExhausted {
                    attempts: n + 1,
                    elapsed,
                    last_error: Box::new(err),
                });
            }

            warn!(
                target: "arbor::retry",
                attempt = n + 1,
                ?delay,
                error = %err,
                "Transient failure, retrying"
            );
            self.clock.sleep(delay);
            n += 1;
        }
    }
}
