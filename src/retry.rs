//! Bounded (or unbounded) retry of a fallible async operation.

use std::future::Future;
use std::time::Duration;

/// How many additional attempts follow a failed first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryLimit {
    Limited(u32),
    Unlimited,
}

impl RetryLimit {
    /// Map a configured retry count; any negative value means unlimited.
    pub fn from_max_retry(max_retry: i64) -> Self {
        if max_retry < 0 {
            RetryLimit::Unlimited
        } else {
            RetryLimit::Limited(u32::try_from(max_retry).unwrap_or(u32::MAX))
        }
    }

    /// Whether another attempt may follow `retries_done` retries.
    pub fn allows_retry(&self, retries_done: u32) -> bool {
        match self {
            RetryLimit::Limited(max) => retries_done < *max,
            RetryLimit::Unlimited => true,
        }
    }
}

/// Delay inserted before each retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Retry immediately
    #[default]
    None,

    /// Same delay before every retry
    Fixed { delay: Duration },

    /// `base` doubled on every retry, plus up to 25% jitter, capped at `max`
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed { delay } => delay,
            Backoff::Exponential { base, max } => {
                let base_ms = base.as_millis() as u64;
                let exponential = base_ms.saturating_mul(1 << retry.saturating_sub(1).min(10));
                let jitter = rand::random::<u64>() % (exponential / 4 + 1);
                let total = exponential.saturating_add(jitter).min(max.as_millis() as u64);
                Duration::from_millis(total)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub limit: RetryLimit,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(limit: RetryLimit, backoff: Backoff) -> Self {
        Self { limit, backoff }
    }

    /// Immediate retries, up to `max_retry` of them (negative: unlimited).
    pub fn immediate(max_retry: i64) -> Self {
        Self::new(RetryLimit::from_max_retry(max_retry), Backoff::None)
    }
}

/// Errors that know whether trying again could help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Final result of [`retry`].
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Succeeded { value: T, attempts: u32 },

    /// Every allowed attempt failed with a retryable error
    Exhausted { last_error: E, attempts: u32 },

    /// An attempt failed with an error that retrying cannot fix
    Aborted { error: E, attempts: u32 },
}

impl<T, E> RetryOutcome<T, E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. }
            | RetryOutcome::Exhausted { attempts, .. }
            | RetryOutcome::Aborted { attempts, .. } => *attempts,
        }
    }
}

/// Run `op` until it succeeds, fails fatally, or the policy runs out.
///
/// `op` receives the zero-based attempt number.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
{
    let mut attempt: u32 = 0;

    loop {
        match op(attempt).await {
            Ok(value) => {
                return RetryOutcome::Succeeded {
                    value,
                    attempts: attempt.saturating_add(1),
                }
            }
            Err(error) if !error.is_retryable() => {
                return RetryOutcome::Aborted {
                    error,
                    attempts: attempt.saturating_add(1),
                }
            }
            Err(error) => {
                if !policy.limit.allows_retry(attempt) {
                    return RetryOutcome::Exhausted {
                        last_error: error,
                        attempts: attempt.saturating_add(1),
                    };
                }
                attempt = attempt.saturating_add(1);
                let delay = policy.backoff.delay(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
