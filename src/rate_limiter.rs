/// Token-bucket rate limiter guarding outbound RPC calls.
///
/// Generalizes the teacher's `tokio::sync::Semaphore` bounded-concurrency
/// idiom (see `parallel.rs`) from "N concurrent" to "N per interval,
/// refilled continuously": a `parking_lot::Mutex` holds the bucket state
/// synchronously (no `.await` while the lock is held) and callers that find
/// the bucket empty sleep for the computed wait time instead of failing.
use parking_lot::Mutex;
use std::time::{Duration, Instant};

use crate::error::RateLimiterError;
use crate::metrics;

pub struct ConsumeOutcome {
    pub allowed: bool,
    pub wait_ms: u64,
    pub tokens_remaining: f64,
}

struct Bucket {
    tokens: f64,
    capacity: f64,
    tokens_per_interval: f64,
    interval_ms: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed_ms = now.duration_since(self.last_refill).as_secs_f64() * 1_000.0;
        let added = (elapsed_ms / self.interval_ms * self.tokens_per_interval).floor();
        if added > 0.0 {
            self.tokens = (self.tokens + added).min(self.capacity);
            self.last_refill = now;
        }
    }

    fn try_take(&mut self, n: f64) -> ConsumeOutcome {
        self.refill();
        if self.tokens >= n {
            self.tokens -= n;
            ConsumeOutcome { allowed: true, wait_ms: 0, tokens_remaining: self.tokens }
        } else {
            let deficit = n - self.tokens;
            let wait_ms = (deficit / self.tokens_per_interval * self.interval_ms).ceil().max(0.0) as u64;
            ConsumeOutcome { allowed: false, wait_ms, tokens_remaining: self.tokens }
        }
    }
}

pub struct RateLimiter {
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// `tokens_per_interval` tokens become available every `interval_ms`,
    /// up to a burst capacity of `burst` (defaults to 2x `tokens_per_interval`,
    /// per spec).
    pub fn new(
        tokens_per_interval: u32,
        interval_ms: u64,
        burst: Option<u32>,
    ) -> Result<Self, RateLimiterError> {
        if tokens_per_interval == 0 {
            return Err(RateLimiterError::InvalidTokensPerInterval);
        }
        if interval_ms == 0 {
            return Err(RateLimiterError::InvalidInterval);
        }
        let capacity = burst.unwrap_or(tokens_per_interval.saturating_mul(2)) as f64;
        Ok(Self {
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                capacity,
                tokens_per_interval: tokens_per_interval as f64,
                interval_ms: interval_ms as f64,
                last_refill: Instant::now(),
            }),
        })
    }

    /// Non-blocking: attempts to take `n` tokens, reporting how long the
    /// caller would need to wait if denied.
    pub fn try_consume_n(&self, n: u32) -> ConsumeOutcome {
        self.bucket.lock().try_take(n as f64)
    }

    /// Non-blocking single-token take, kept for callers that don't need the
    /// full outcome (e.g. construction-time sanity tests).
    pub fn try_consume(&self) -> bool {
        self.try_consume_n(1).allowed
    }

    /// Loop-based (never tail-recursive, so a hot RPC path can't blow the
    /// stack): sleeps the bucket's computed `waitMs` between attempts, and
    /// surfaces `RetriesExhausted` after `max_retries` attempts rather than
    /// looping forever on a misconfigured clock.
    pub async fn consume(&self, n: u32, max_retries: u32) -> Result<(), RateLimiterError> {
        for attempt in 0..=max_retries {
            let outcome = self.try_consume_n(n);
            if outcome.allowed {
                return Ok(());
            }
            if attempt == max_retries {
                break;
            }
            metrics::increment_rate_limiter_waits();
            tokio::time::sleep(Duration::from_millis(outcome.wait_ms.max(1))).await;
        }
        metrics::increment_rate_limiter_rejected();
        Err(RateLimiterError::RetriesExhausted(max_retries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_tokens_per_interval() {
        assert!(RateLimiter::new(0, 1000, None).is_err());
    }

    #[test]
    fn rejects_zero_interval() {
        assert!(RateLimiter::new(10, 0, None).is_err());
    }

    #[test]
    fn default_burst_is_double_tokens_per_interval() {
        let limiter = RateLimiter::new(2, 1_000, None).unwrap();
        for _ in 0..4 {
            assert!(limiter.try_consume());
        }
        assert!(!limiter.try_consume());
    }

    #[test]
    fn try_consume_drains_capacity_then_refuses() {
        let limiter = RateLimiter::new(2, 1_000, Some(2)).unwrap();
        assert!(limiter.try_consume());
        assert!(limiter.try_consume());
        assert!(!limiter.try_consume());
    }

    #[test]
    fn try_consume_n_reports_wait_when_denied() {
        let limiter = RateLimiter::new(2, 1_000, Some(2)).unwrap();
        let outcome = limiter.try_consume_n(5);
        assert!(!outcome.allowed);
        assert!(outcome.wait_ms > 0);
    }

    #[tokio::test]
    async fn consume_succeeds_once_token_is_available() {
        let limiter = RateLimiter::new(1, 50, Some(1)).unwrap();
        assert!(limiter.try_consume());
        limiter.consume(1, 20).await.unwrap();
    }

    #[tokio::test]
    async fn consume_errors_after_exhausting_retries() {
        let limiter = RateLimiter::new(1, 10_000, Some(1)).unwrap();
        assert!(limiter.try_consume());
        let result = limiter.consume(1, 1).await;
        assert!(result.is_err());
    }
}
