/// Exponential backoff with jitter for retriable RPC calls.
///
/// A small standalone combinator rather than a method on the RPC client, so
/// the sync engine and the gap repair worker can both wrap fallible async
/// calls in it without depending on each other. Uses `rand` for jitter,
/// matching the `rand` dependency already carried for the rate limiter's
/// polling interval.
use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::metrics;

/// Retries `f` up to `max_retries` additional times (so `max_retries + 1`
/// total attempts) while `is_retriable` returns true for the error. Delay
/// doubles each attempt starting from `base_delay`, capped at `maxDelayMs`
/// (10s default, matching spec.md §4.6), with +/-50% jitter (`jitterFactor`
/// 0.5, also the spec default).
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    component: &str,
    max_retries: u32,
    base_delay: Duration,
    is_retriable: R,
    f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    retry_with_backoff_scaled(component, max_retries, base_delay, is_retriable, |_| 1, f).await
}

/// Same as [`retry_with_backoff`], but `backoff_scale` lets the caller double
/// (or otherwise scale) the delay for a specific attempt's error — used by
/// the RPC client to apply doubled backoff on a rate-limit indication per
/// spec.md §4.1 Phase 1 ("On a rate-limit indication ... the worker uses
/// doubled backoff for that attempt").
pub async fn retry_with_backoff_scaled<T, E, F, Fut, R, S>(
    component: &str,
    max_retries: u32,
    base_delay: Duration,
    is_retriable: R,
    backoff_scale: S,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    S: Fn(&E) -> u32,
{
    const MAX_DELAY: Duration = Duration::from_secs(10);
    let mut attempt: u32 = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= max_retries || !is_retriable(&err) {
                    return Err(err);
                }
                metrics::increment_retry_attempts(component);
                let scale = backoff_scale(&err).max(1);
                let delay = backoff_delay(base_delay, attempt, MAX_DELAY) * scale;
                tokio::time::sleep(delay.min(MAX_DELAY)).await;
                attempt += 1;
            }
        }
    }
}

fn backoff_delay(base: Duration, attempt: u32, max: Duration) -> Duration {
    let exp = base.as_millis().saturating_mul(1u128 << attempt.min(20));
    let capped = exp.min(max.as_millis());
    let jitter_frac = rand::thread_rng().gen_range(0.5..1.5);
    let jittered = (capped as f64 * jitter_frac) as u64;
    Duration::from_millis(jittered.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_immediately_without_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_with_backoff(
            "test",
            3,
            Duration::from_millis(1),
            |_: &&str| true,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(42) }
            },
        )
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_with_backoff(
            "test",
            5,
            Duration::from_millis(1),
            |_: &&str| true,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient")
                    } else {
                        Ok(7)
                    }
                }
            },
        )
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_on_non_retriable_error() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_with_backoff(
            "test",
            5,
            Duration::from_millis(1),
            |_: &&str| false,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal") }
            },
        )
        .await;
        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_with_backoff(
            "test",
            2,
            Duration::from_millis(1),
            |_: &&str| true,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("transient") }
            },
        )
        .await;
        assert_eq!(result, Err("transient"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
