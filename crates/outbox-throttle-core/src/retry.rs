//! Per-attempt retry scheduling: backoff, jitter, and the standalone
//! `execute` helper (spec.md §4.4).
//!
//! Two retry layers are modeled here: in-flight backoff (`next_delay`,
//! used by a worker that keeps its pacer/worker slot between attempts) and
//! rescheduled backoff (`reschedule_delay`, used when an item goes back to
//! the work-store). Per the resolution of the "in-flight vs rescheduled
//! accounting" open question (spec.md §9), both layers increment the same
//! `WorkItem::attempt` counter, so `retry_max` bounds their combined total.

use rand::Rng;
use std::time::Duration;

/// Jitter strategy applied on top of exponential backoff, per spec.md
/// §4.4(a). Mirrors the three named modes (`random`, `full`,
/// `decorrelated`) the spec calls out for library users, grounded in the
/// `ExponentialRandomBackoff`/`IntervalFunction` family in
/// `tower-retry-plus::backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JitterType {
    /// Adds uniform jitter in `[0, jitter_ms)` on top of the backoff.
    Random,
    /// Uniform in `[0, backoff]`.
    Full,
    /// Uniform in `[base_delay, min(3*backoff, cap)]`.
    Decorrelated,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub retry_max: u32,
    pub backoff_cap_seconds: u64,
    pub base_delay_ms: u64,
    pub jitter_ms: u64,
    pub jitter_type: JitterType,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_max: 8,
            backoff_cap_seconds: 300,
            base_delay_ms: 1000,
            jitter_ms: 1000,
            jitter_type: JitterType::Random,
        }
    }
}

/// `min(2^attempt, cap) * 1000` ms, the exponential backoff base shared by
/// both retry layers.
fn exponential_backoff_ms(attempt: u32, cap_seconds: u64) -> u64 {
    let capped_exp = 2u64.saturating_pow(attempt).min(cap_seconds);
    capped_exp * 1000
}

/// Computes the in-flight retry delay (spec.md §4.4(a)): `max(retry_after,
/// backoff + jitter)`, honoring a server-supplied `Retry-After` when
/// present.
pub fn next_delay(
    config: &RetryConfig,
    attempt: u32,
    server_retry_after: Option<Duration>,
) -> Duration {
    let backoff_ms = exponential_backoff_ms(attempt, config.backoff_cap_seconds);
    let jittered_ms = apply_jitter(config, backoff_ms);
    let computed = Duration::from_millis(jittered_ms);

    match server_retry_after {
        Some(retry_after) => computed.max(retry_after),
        None => computed,
    }
}

fn apply_jitter(config: &RetryConfig, backoff_ms: u64) -> u64 {
    let mut rng = rand::rng();
    match config.jitter_type {
        JitterType::Random => backoff_ms + rng.random_range(0..config.jitter_ms.max(1)),
        JitterType::Full => rng.random_range(0..=backoff_ms.max(1)),
        JitterType::Decorrelated => {
            let cap_ms = config.backoff_cap_seconds * 1000;
            let upper = (3 * backoff_ms).min(cap_ms).max(config.base_delay_ms);
            rng.random_range(config.base_delay_ms..=upper)
        }
    }
}

/// Computes the rescheduled-retry delay (spec.md §4.4(b)): `min(2^next, cap)
/// + uniform[0,1)` seconds, returned as a `Duration`.
pub fn reschedule_delay(config: &RetryConfig, next_attempt: u32) -> Duration {
    let capped = 2u64.saturating_pow(next_attempt).min(config.backoff_cap_seconds);
    let fractional: f64 = rand::rng().random_range(0.0..1.0);
    Duration::from_secs_f64(capped as f64 + fractional)
}

/// Whether `next_attempt` has exhausted the retry budget and the item
/// should move to the dead-letter queue instead of being rescheduled.
pub fn is_retry_exhausted(config: &RetryConfig, next_attempt: u32) -> bool {
    next_attempt >= config.retry_max
}

/// Outcome of a standalone `execute` call.
#[derive(Debug)]
pub struct ExecuteResult<T, E> {
    pub success: bool,
    pub result: Option<T>,
    pub error: Option<E>,
    pub attempts: u32,
}

/// Standalone retry helper (spec.md §4.4 "Contract of `execute(fn)`") for
/// library users who want in-flight retry semantics without the full
/// dispatcher. `should_retry` classifies an error as retriable;
/// non-retriable errors return immediately.
pub async fn execute<F, Fut, T, E>(
    config: &RetryConfig,
    mut should_retry: impl FnMut(&E) -> bool,
    mut f: F,
) -> ExecuteResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(result) => {
                return ExecuteResult {
                    success: true,
                    result: Some(result),
                    error: None,
                    attempts: attempt + 1,
                };
            }
            Err(error) => {
                attempt += 1;
                if !should_retry(&error) || attempt >= config.retry_max {
                    return ExecuteResult {
                        success: false,
                        result: None,
                        error: Some(error),
                        attempts: attempt,
                    };
                }
                let delay = next_delay(config, attempt, None);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_before_cap() {
        assert_eq!(exponential_backoff_ms(0, 300), 1000);
        assert_eq!(exponential_backoff_ms(1, 300), 2000);
        assert_eq!(exponential_backoff_ms(2, 300), 4000);
    }

    #[test]
    fn backoff_respects_cap() {
        assert_eq!(exponential_backoff_ms(20, 300), 300_000);
    }

    #[test]
    fn server_retry_after_wins_when_larger() {
        let config = RetryConfig {
            jitter_ms: 1,
            ..Default::default()
        };
        let delay = next_delay(&config, 0, Some(Duration::from_millis(1500)));
        assert!(delay >= Duration::from_millis(1500));
    }

    #[test]
    fn random_jitter_stays_in_range() {
        let config = RetryConfig {
            jitter_type: JitterType::Random,
            jitter_ms: 1000,
            ..Default::default()
        };
        for _ in 0..1000 {
            let delay = next_delay(&config, 0, None);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay < Duration::from_millis(2000));
        }
    }

    #[test]
    fn full_jitter_stays_within_backoff() {
        let config = RetryConfig {
            jitter_type: JitterType::Full,
            ..Default::default()
        };
        for _ in 0..1000 {
            let delay = next_delay(&config, 1, None);
            assert!(delay <= Duration::from_millis(2000));
        }
    }

    #[test]
    fn decorrelated_jitter_stays_in_bounds() {
        let config = RetryConfig {
            jitter_type: JitterType::Decorrelated,
            base_delay_ms: 100,
            backoff_cap_seconds: 3,
            ..Default::default()
        };
        let mut saw_variance = false;
        let mut first = None;
        for _ in 0..10_000 {
            let delay = next_delay(&config, 3, None);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_secs(3));
            match first {
                None => first = Some(delay),
                Some(f) if f != delay => saw_variance = true,
                _ => {}
            }
        }
        assert!(saw_variance, "decorrelated jitter should not be a constant");
    }

    #[test]
    fn reschedule_delay_is_at_least_the_floor() {
        let config = RetryConfig::default();
        let delay = reschedule_delay(&config, 1);
        assert!(delay >= Duration::from_secs(2));
        assert!(delay < Duration::from_secs(3));
    }

    #[test]
    fn retry_exhausted_at_configured_max() {
        let config = RetryConfig {
            retry_max: 8,
            ..Default::default()
        };
        assert!(!is_retry_exhausted(&config, 7));
        assert!(is_retry_exhausted(&config, 8));
    }

    #[tokio::test]
    async fn execute_retries_until_success() {
        let config = RetryConfig {
            base_delay_ms: 1,
            jitter_ms: 1,
            ..Default::default()
        };
        let mut calls = 0;
        let result = execute(
            &config,
            |_: &&str| true,
            || {
                calls += 1;
                let calls = calls;
                async move {
                    if calls < 3 {
                        Err("busy")
                    } else {
                        Ok("ok")
                    }
                }
            },
        )
        .await;
        assert!(result.success);
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn execute_stops_on_non_retriable_error() {
        let config = RetryConfig::default();
        let mut calls = 0;
        let result = execute(
            &config,
            |_: &&str| false,
            || {
                calls += 1;
                async move { Err::<&str, _>("nope") }
            },
        )
        .await;
        assert!(!result.success);
        assert_eq!(result.attempts, 1);
    }
}
