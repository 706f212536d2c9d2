//! Fixed-interval rate limiter owned by each provider adapter.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Default pace for remote providers: two calls per second.
pub const DEFAULT_CALLS_PER_SECOND: f64 = 2.0;

/// Spaces calls at least `interval` apart.
///
/// Slots are reserved under a lock and awaited outside it, so concurrent
/// callers queue up in arrival order.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Limits to `calls_per_second`. Non-positive or non-finite rates disable limiting.
    pub fn per_second(calls_per_second: f64) -> Self {
        if !calls_per_second.is_finite() || calls_per_second <= 0.0 {
            return Self::unlimited();
        }
        Self::with_interval(Duration::from_secs_f64(1.0 / calls_per_second))
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn unlimited() -> Self {
        Self::with_interval(Duration::ZERO)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Waits until the next call slot is available.
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }

        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next = Some(slot + self.interval);
            slot
        };

        tokio::time::sleep_until(slot).await;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::per_second(DEFAULT_CALLS_PER_SECOND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_second_interval() {
        assert_eq!(RateLimiter::per_second(2.0).interval(), Duration::from_millis(500));
        assert_eq!(RateLimiter::per_second(0.0).interval(), Duration::ZERO);
        assert_eq!(RateLimiter::per_second(f64::NAN).interval(), Duration::ZERO);
        assert_eq!(RateLimiter::default().interval(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_acquire_spaces_calls() {
        let limiter = RateLimiter::with_interval(Duration::from_millis(20));
        let start = std::time::Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        // First call is immediate, the next two wait one interval each.
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_unlimited_never_waits() {
        let limiter = RateLimiter::unlimited();
        let start = std::time::Instant::now();
        for _ in 0..100 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
