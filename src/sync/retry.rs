//! Retry Policy
//!
//! Bounded attempts with a Fibonacci delay schedule. Business failures stop
//! the loop at once; transient ones are retried until the ceiling.

use backon::{BackoffBuilder, FibonacciBackoff, FibonacciBuilder};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::SyncConfig;

/// Classification seam between error types and [`RetryPolicy`]
pub trait Retryable {
    /// True if another attempt may succeed
    fn is_retryable(&self) -> bool;

    /// Minimum wait the failing party asked for, if any
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(10), Duration::from_secs(2))
    }
}

impl RetryPolicy {
    /// `max_attempts` counts the first try; zero is treated as one.
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.retry_attempts,
            config.retry_base_delay(),
            config.retry_max_delay(),
        )
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Waits between attempts; one fewer than `max_attempts`
    pub fn delays(&self) -> FibonacciBackoff {
        FibonacciBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts - 1)
            .build()
    }

    /// Delay before the next attempt: the backoff step, stretched to the
    /// error's `retry_after` but never past `max_delay`.
    fn delay_for<E: Retryable>(&self, backoff: Duration, err: &E) -> Duration {
        match err.retry_after() {
            Some(requested) => backoff.max(requested).min(self.max_delay),
            None => backoff,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    /// `op` receives the 1-based attempt number. The last error is returned.
    pub async fn retry<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut delays = self.delays();
        let mut attempt = 1;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_retryable() {
                return Err(err);
            }
            let Some(backoff) = delays.next() else {
                return Err(err);
            };
            let delay = self.delay_for(backoff, &err);
            warn!(
                attempt,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "Attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
