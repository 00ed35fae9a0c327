//! Per-upstream circuit breaker.
//!
//! Wraps every REST call to a failing dependency: after a threshold of
//! consecutive failures the breaker opens and rejects calls without any
//! network attempt. Once the recovery timeout elapses a single trial call
//! is admitted (half-open); its outcome decides whether the breaker closes
//! again or reopens.
//!
//! The breaker only tracks counters under its lock — it never holds the
//! lock across a network call. Callers acquire before the call and report
//! the outcome after it completes.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

/// State of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation — calls pass through.
    Closed,
    /// Tripped — calls are rejected until the recovery timeout elapses.
    Open,
    /// One trial call is in flight; its outcome decides the next state.
    HalfOpen,
}

/// Error returned when the breaker rejects a call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker '{upstream}' is open")]
pub struct BreakerOpen {
    pub upstream: String,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker opens
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a trial call
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Failure-isolation state machine for one upstream dependency.
pub struct CircuitBreaker {
    upstream: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(upstream: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            upstream: upstream.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Ask permission to make a call.
    ///
    /// Returns `Err(BreakerOpen)` without any network attempt while the
    /// breaker is open. After the recovery timeout the breaker moves to
    /// half-open and admits exactly one caller; concurrent callers are
    /// rejected until the trial's outcome is recorded.
    pub fn try_acquire(&self) -> Result<(), BreakerOpen> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.recovery_timeout {
                    info!(upstream = %self.upstream, "circuit breaker half-open, admitting trial call");
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    Ok(())
                } else {
                    Err(BreakerOpen {
                        upstream: self.upstream.clone(),
                    })
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(BreakerOpen {
                        upstream: self.upstream.clone(),
                    })
                } else {
                    inner.trial_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Record a successful call — closes the breaker and resets the counter.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != BreakerState::Closed {
            info!(upstream = %self.upstream, "circuit breaker closed");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    /// Record a failed call. All call failures count.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                warn!(upstream = %self.upstream, "trial call failed, circuit breaker reopened");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.trial_in_flight = false;
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        upstream = %self.upstream,
                        failures = inner.consecutive_failures,
                        "failure threshold reached, circuit breaker opened"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::Open => {
                // Already open; keep the original timer running.
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, recovery: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout: recovery,
            },
        )
    }

    #[test]
    fn starts_closed() {
        let cb = breaker(3, Duration::from_secs(60));
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.try_acquire().is_ok());
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let cb = breaker(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        assert!(cb.try_acquire().is_ok()); // 2 < 3
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(cb.try_acquire().is_err());
    }

    #[test]
    fn success_resets_failure_counter() {
        let cb = breaker(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure(); // 1 failure after reset
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_admits_exactly_one_trial() {
        let cb = breaker(1, Duration::from_millis(10));
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(cb.try_acquire().is_err());

        std::thread::sleep(Duration::from_millis(15));

        // First caller gets the trial slot, second is rejected.
        assert!(cb.try_acquire().is_ok());
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        assert!(cb.try_acquire().is_err());
    }

    #[test]
    fn trial_success_closes_breaker() {
        let cb = breaker(1, Duration::from_millis(10));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(15));
        assert!(cb.try_acquire().is_ok());

        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.try_acquire().is_ok());
    }

    #[test]
    fn trial_failure_reopens_and_restarts_timer() {
        let cb = breaker(1, Duration::from_millis(20));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(25));
        assert!(cb.try_acquire().is_ok());

        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        // Timer restarted: still rejected immediately after reopening.
        assert!(cb.try_acquire().is_err());
    }
}
