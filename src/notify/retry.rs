//! Bounded retry with a fixed delay, as an explicit policy value.
//!
//! Every external I/O call (notification delivery, model publication) takes a
//! `RetryPolicy` and returns a typed success/exhausted result; expected
//! transient failures never flow through ad-hoc sleep loops.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Max attempts, fixed inter-attempt delay, and a per-attempt deadline.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, retry_delay: Duration, timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_delay,
            timeout,
        }
    }
}

/// All attempts failed; the operation is abandoned, not escalated.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{what}: retries exhausted after {attempts} attempts (last error: {last_error})")]
pub struct Exhausted {
    pub what: String,
    pub attempts: u32,
    pub last_error: String,
}

impl RetryPolicy {
    /// Run `op` until it succeeds or attempts are exhausted. Each attempt is
    /// bounded by the policy timeout; attempts are separated by the fixed
    /// delay. Callers must not hold shared-state locks across this call.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, Exhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match tokio::time::timeout(self.timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    last_error = e.to_string();
                    warn!(what, attempt, max = self.max_attempts, error = %last_error, "Attempt failed");
                }
                Err(_) => {
                    last_error = format!("timed out after {:?}", self.timeout);
                    warn!(what, attempt, max = self.max_attempts, "Attempt timed out");
                }
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        Err(Exhausted {
            what: what.to_string(),
            attempts: self.max_attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_secs(1));
        let calls = AtomicU32::new(0);
        let result = policy
            .run("test-op", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("flaky")
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_is_typed() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_secs(1));
        let result: Result<(), Exhausted> =
            policy.run("test-op", || async { Err::<(), _>("down") }).await;
        let err = result.unwrap_err();
        assert_eq!(err.attempts, 2);
        assert_eq!(err.last_error, "down");
    }

    #[tokio::test]
    async fn test_attempt_deadline() {
        let policy = RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(10));
        let result: Result<(), Exhausted> = policy
            .run("test-op", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), &str>(())
            })
            .await;
        assert!(result.unwrap_err().last_error.contains("timed out"));
    }
}
