//! Pluggable retry policy wrapping individual store calls: classifies
//! errors retryable vs terminal and applies capped exponential backoff with
//! jitter (spec §5, Design Notes "Retry loop around conditional commits").

use std::time::Duration;

use tracing::warn;

use crate::error::{DeltaResult, Error};

/// Capped exponential backoff with jitter. `base` is the first retry delay;
/// each subsequent attempt doubles, capped at `max_delay`; `max_attempts`
/// bounds the total number of tries (including the first).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries — useful for tests that want
    /// deterministic single-attempt behavior.
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32.wrapping_shl(attempt).max(1));
        let capped = exp.min(self.max_delay);
        let jitter_fraction = jitter_seed(attempt) % 1000;
        capped.mul_f64(0.5 + (jitter_fraction as f64 / 1000.0) * 0.5)
    }

    /// Run `op` until it succeeds, exhausts `max_attempts`, or returns a
    /// terminal (non-retryable) error. Only [`Error::is_retryable`] errors
    /// are retried; a `ConcurrencyConflict` is always retryable (spec §7).
    pub async fn retry<T, F, Fut>(&self, mut op: F) -> DeltaResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = DeltaResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(attempt, ?delay, error = %e, "retrying after transient error");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// A cheap, dependency-free jitter source. Not cryptographically random —
/// only used to desynchronize retrying peers, where the system clock's low
/// bits are entropy enough.
fn jitter_seed(attempt: u32) -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos as u64).wrapping_mul(2654435761).wrapping_add(attempt as u64)
}

/// A caller-supplied classification override, for stores whose transport
/// errors need finer-grained retryable/terminal distinctions than
/// [`Error::is_retryable`]'s default (spec §7: "`Store` — ... retryable or
/// not per the store's classification").
pub trait RetryClassifier: Send + Sync {
    fn is_retryable(&self, error: &Error) -> bool;
}

/// The default classifier: defers to [`Error::is_retryable`].
pub struct DefaultClassifier;

impl RetryClassifier for DefaultClassifier {
    fn is_retryable(&self, error: &Error) -> bool {
        error.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_concurrency_conflict_until_success() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let result = policy
            .retry(|| async {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(Error::ConcurrencyConflict { expected: 0, actual: 1 })
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_terminal_errors() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result: DeltaResult<()> = policy
            .retry(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Error::validation("bad input"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
