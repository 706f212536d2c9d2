//! Retry with exponential backoff and jitter.
//!
//! [`RetryPolicy::run`] wraps any fallible async call. Transient failures
//! (see [`LlmError::is_transient`]) are retried with a doubling delay plus
//! random jitter; permanent failures return immediately.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::LlmError;

/// Default number of attempts, including the first call.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay before the first retry.
const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Upper bound of the uniform jitter added to every backoff delay.
const DEFAULT_MAX_JITTER_MS: u64 = 1000;

/// Explicit retry policy applied around a remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied to the delay after each failed retry.
    pub factor: f64,
    /// Maximum random jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            factor: 2.0,
            max_jitter: Duration::from_millis(DEFAULT_MAX_JITTER_MS),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt budget and default delays.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1)
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor.max(1.0);
        self
    }

    pub fn with_max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = jitter;
        self
    }

    /// Deterministic part of the delay before retry number `retry` (1-based).
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        self.base_delay.mul_f64(self.factor.powi(exponent))
    }

    fn jitter(&self) -> Duration {
        use rand::RngExt;

        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let secs: f64 = rand::rng().random_range(0.0..self.max_jitter.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Runs `op` until it succeeds, fails permanently, or the budget is spent.
    ///
    /// Rate-limit errors carrying a server hint wait at least that long.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_transient() => {
                    warn!(operation, attempt, error = %err, "Permanent error, not retrying");
                    return Err(err);
                }
                Err(err) if attempt >= max_attempts => {
                    warn!(
                        operation,
                        attempts = attempt,
                        error = %err,
                        "Retries exhausted"
                    );
                    return Err(err);
                }
                Err(err) => {
                    let mut delay = self.backoff_delay(attempt) + self.jitter();
                    if let Some(hint) = err.retry_after() {
                        delay = delay.max(hint);
                    }
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient error, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
