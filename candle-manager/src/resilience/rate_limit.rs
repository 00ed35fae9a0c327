//! Dual-window rate limiting for upstream REST APIs.
//!
//! Every upstream publishes two independent ceilings: a short burst limit
//! (requests per second) and a sustained limit (requests per minute). Both
//! must admit a request before it is sent.
//!
//! Uses the `governor` crate for token bucket rate limiting; an async mutex
//! serializes waiters so slots are granted in FIFO order.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use tokio::sync::Mutex;
use tracing::debug;

type Limiter = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Published request ceilings for one upstream.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitCeilings {
    /// Burst ceiling in requests per second (0 disables the bucket)
    pub requests_per_second: u32,
    /// Sustained ceiling in requests per minute (0 disables the bucket)
    pub requests_per_minute: u32,
}

/// Dual-window rate limiter for one upstream dependency.
///
/// `acquire` only ever delays; there is no error condition.
pub struct DualWindowRateLimiter {
    /// Serializes waiters so the two buckets are consulted in arrival order
    queue: Mutex<()>,
    burst: Option<Arc<Limiter>>,
    sustained: Option<Arc<Limiter>>,
}

impl DualWindowRateLimiter {
    /// Create a limiter from the upstream's published ceilings.
    pub fn new(ceilings: RateLimitCeilings) -> Self {
        let burst = NonZeroU32::new(ceilings.requests_per_second)
            .map(|rate| Arc::new(GovernorRateLimiter::direct(Quota::per_second(rate))));
        let sustained = NonZeroU32::new(ceilings.requests_per_minute)
            .map(|rate| Arc::new(GovernorRateLimiter::direct(Quota::per_minute(rate))));

        Self {
            queue: Mutex::new(()),
            burst,
            sustained,
        }
    }

    /// Block until a request slot is available under both ceilings.
    pub async fn acquire(&self) {
        // Tokio mutexes wake waiters in FIFO order, so the first caller to
        // arrive is the first to receive a slot.
        let _slot = self.queue.lock().await;

        if let Some(ref burst) = self.burst {
            burst.until_ready().await;
        }
        if let Some(ref sustained) = self.sustained {
            debug!("waiting on sustained rate window");
            sustained.until_ready().await;
        }
    }

    /// Whether any ceiling is enforced.
    pub fn is_enabled(&self) -> bool {
        self.burst.is_some() || self.sustained.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_when_both_ceilings_zero() {
        let limiter = DualWindowRateLimiter::new(RateLimitCeilings {
            requests_per_second: 0,
            requests_per_minute: 0,
        });
        assert!(!limiter.is_enabled());
    }

    #[tokio::test]
    async fn acquire_completes_under_generous_ceilings() {
        let limiter = DualWindowRateLimiter::new(RateLimitCeilings {
            requests_per_second: 1000,
            requests_per_minute: 60_000,
        });
        assert!(limiter.is_enabled());

        for _ in 0..5 {
            limiter.acquire().await;
        }
    }

    #[tokio::test]
    async fn acquire_is_safe_for_concurrent_callers() {
        let limiter = Arc::new(DualWindowRateLimiter::new(RateLimitCeilings {
            requests_per_second: 1000,
            requests_per_minute: 60_000,
        }));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
