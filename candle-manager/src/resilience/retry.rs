//! Classification-driven retry with escalating backoff.

use std::future::Future;
use std::time::Duration;

use market_common::ErrorClassification;
use tracing::warn;

/// Retry policy with separate backoff bases for rate-limit responses and
/// other transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum retries after the initial attempt
    pub max_retries: u32,
    /// Backoff base for generic transient failures
    pub base_delay: Duration,
    /// Backoff base for upstream rate-limit responses
    pub rate_limit_delay: Duration,
    /// Ceiling for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            rate_limit_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), doubling per attempt
    /// and capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32, rate_limited: bool) -> Duration {
        let base = if rate_limited {
            self.rate_limit_delay
        } else {
            self.base_delay
        };
        let factor = 2u32.saturating_pow(attempt.min(16));
        base.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op`, retrying classified-transient failures with escalating
    /// backoff. Permanent failures and retry exhaustion return the last
    /// error to the caller.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        E: ErrorClassification + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt, err.is_rate_limited());
                    warn!(
                        operation = what,
                        attempt = attempt + 1,
                        max = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_common::ErrorCategory;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError(ErrorCategory);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error")
        }
    }

    impl ErrorClassification for TestError {
        fn category(&self) -> ErrorCategory {
            self.0
        }
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            rate_limit_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
        }
    }

    #[test]
    fn delays_escalate_and_cap() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            rate_limit_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(60),
        };

        assert_eq!(policy.delay_for(0, false), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1, false), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2, false), Duration::from_secs(8));
        // Rate limits start from the longer dedicated base.
        assert_eq!(policy.delay_for(0, true), Duration::from_secs(30));
        assert_eq!(policy.delay_for(1, true), Duration::from_secs(60));
        // Capped at max_delay.
        assert_eq!(policy.delay_for(4, true), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, TestError> = quick_policy()
            .run("op", || async {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(TestError(ErrorCategory::Transient))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), TestError> = quick_policy()
            .run("op", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(TestError(ErrorCategory::Permanent))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), TestError> = quick_policy()
            .run("op", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(TestError(ErrorCategory::Transient))
            })
            .await;

        assert!(result.is_err());
        // Initial attempt + max_retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }
}
