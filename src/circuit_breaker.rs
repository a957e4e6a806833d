/// Circuit breaker guarding calls to a flaky upstream RPC endpoint.
///
/// Grounded on the same `parking_lot::Mutex`-held-synchronous-state idiom as
/// [`crate::rate_limiter::RateLimiter`]: state transitions never hold the
/// lock across an `.await`, so the breaker composes cleanly with the retry
/// combinator and the RPC client without risking deadlock under load. All
/// counters live behind one mutex so a state transition and its accompanying
/// counter reset happen atomically — two separate locks would let a call
/// observe `HalfOpen` with stale half-open counters from the previous probe.
use parking_lot::Mutex;
use std::time::{Duration, Instant};

use crate::error::CircuitBreakerError;
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

impl State {
    fn as_metric_value(self) -> i64 {
        match self {
            State::Closed => 0,
            State::HalfOpen => 1,
            State::Open => 2,
        }
    }
}

struct Inner {
    state: State,
    failure_count: u32,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
    half_open_successes: u32,
}

pub struct CircuitBreaker {
    label: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_max_calls: u32,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// `half_open_max_calls` does double duty per spec.md §4.7: it both
    /// bounds how many concurrent probes `HALF_OPEN` admits, and is the
    /// number of *consecutive* successful probes required to close the
    /// breaker again.
    pub fn new(label: impl Into<String>, failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self::with_half_open_limit(label, failure_threshold, reset_timeout, 3)
    }

    pub fn with_half_open_limit(
        label: impl Into<String>,
        failure_threshold: u32,
        reset_timeout: Duration,
        half_open_max_calls: u32,
    ) -> Self {
        Self {
            label: label.into(),
            failure_threshold,
            reset_timeout,
            half_open_max_calls: half_open_max_calls.max(1),
            inner: Mutex::new(Inner {
                state: State::Closed,
                failure_count: 0,
                opened_at: None,
                half_open_in_flight: 0,
                half_open_successes: 0,
            }),
        }
    }

    pub fn state(&self) -> State {
        self.inner.lock().state
    }

    /// Call before issuing a request. Returns `Err` if the breaker is open
    /// and the reset timeout hasn't elapsed, or if half-open probe slots are
    /// exhausted.
    pub fn before_call(&self) -> Result<(), CircuitBreakerError> {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Closed => Ok(()),
            State::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.reset_timeout {
                    inner.state = State::HalfOpen;
                    inner.half_open_in_flight = 0;
                    inner.half_open_successes = 0;
                    metrics::set_circuit_breaker_state(&self.label, State::HalfOpen.as_metric_value());
                    self.try_enter_half_open(&mut inner)
                } else {
                    Err(CircuitBreakerError::Open)
                }
            }
            State::HalfOpen => self.try_enter_half_open(&mut inner),
        }
    }

    fn try_enter_half_open(&self, inner: &mut Inner) -> Result<(), CircuitBreakerError> {
        if inner.half_open_in_flight >= self.half_open_max_calls {
            return Err(CircuitBreakerError::Open);
        }
        inner.half_open_in_flight += 1;
        Ok(())
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Closed => {
                inner.failure_count = 0;
            }
            State::HalfOpen => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.half_open_max_calls {
                    inner.state = State::Closed;
                    inner.opened_at = None;
                    inner.failure_count = 0;
                    inner.half_open_in_flight = 0;
                    inner.half_open_successes = 0;
                    metrics::set_circuit_breaker_state(&self.label, State::Closed.as_metric_value());
                }
            }
            State::Open => {}
        }
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            State::HalfOpen => {
                inner.state = State::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_in_flight = 0;
                inner.half_open_successes = 0;
                metrics::set_circuit_breaker_state(&self.label, State::Open.as_metric_value());
                metrics::increment_circuit_breaker_trips(&self.label);
            }
            State::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    inner.state = State::Open;
                    inner.opened_at = Some(Instant::now());
                    metrics::set_circuit_breaker_state(&self.label, State::Open.as_metric_value());
                    metrics::increment_circuit_breaker_trips(&self.label);
                }
            }
            State::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_closed() {
        let cb = CircuitBreaker::new("test", 3, Duration::from_millis(50));
        assert_eq!(cb.state(), State::Closed);
        assert!(cb.before_call().is_ok());
    }

    #[test]
    fn trips_open_after_threshold_failures() {
        let cb = CircuitBreaker::new("test", 2, Duration::from_secs(60));
        cb.on_failure();
        assert_eq!(cb.state(), State::Closed);
        cb.on_failure();
        assert_eq!(cb.state(), State::Open);
        assert!(cb.before_call().is_err());
    }

    #[test]
    fn transitions_to_half_open_after_timeout() {
        let cb = CircuitBreaker::new("test", 1, Duration::from_millis(10));
        cb.on_failure();
        assert_eq!(cb.state(), State::Open);
        std::thread::sleep(Duration::from_millis(15));
        assert!(cb.before_call().is_ok());
        assert_eq!(cb.state(), State::HalfOpen);
    }

    #[test]
    fn half_open_requires_consecutive_successes_to_close() {
        let cb = CircuitBreaker::with_half_open_limit("test", 1, Duration::from_millis(10), 3);
        cb.on_failure();
        std::thread::sleep(Duration::from_millis(15));

        cb.before_call().unwrap();
        cb.on_success();
        assert_eq!(cb.state(), State::HalfOpen);

        cb.before_call().unwrap();
        cb.on_success();
        assert_eq!(cb.state(), State::HalfOpen);

        cb.before_call().unwrap();
        cb.on_success();
        assert_eq!(cb.state(), State::Closed);
    }

    #[test]
    fn half_open_limits_concurrent_probes() {
        let cb = CircuitBreaker::with_half_open_limit("test", 1, Duration::from_millis(10), 2);
        cb.on_failure();
        std::thread::sleep(Duration::from_millis(15));

        assert!(cb.before_call().is_ok());
        assert!(cb.before_call().is_ok());
        assert!(cb.before_call().is_err());
    }

    #[test]
    fn failure_in_half_open_reopens_breaker() {
        let cb = CircuitBreaker::new("test", 1, Duration::from_millis(10));
        cb.on_failure();
        std::thread::sleep(Duration::from_millis(15));
        cb.before_call().unwrap();
        cb.on_failure();
        assert_eq!(cb.state(), State::Open);
    }
}
