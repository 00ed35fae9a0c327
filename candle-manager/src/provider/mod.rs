//! Upstream data providers.
//!
//! Every provider call passes through the rate limiter, then the circuit
//! breaker, then the HTTP client. Errors carry a classification so retry
//! loops can distinguish upstream rate limits from generic transient
//! failures.

pub mod binance;
pub mod coingecko;

use std::time::Duration;

use market_common::{ErrorCategory, ErrorClassification};
use thiserror::Error;

/// Provider errors
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("rate limited by upstream (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error(transparent)]
    BreakerOpen(#[from] crate::resilience::BreakerOpen),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ErrorClassification for ProviderError {
    fn category(&self) -> ErrorCategory {
        match self {
            ProviderError::Request(_) => ErrorCategory::Transient,
            ProviderError::Http { status, .. } if *status >= 500 => ErrorCategory::Transient,
            ProviderError::Http { .. } => ErrorCategory::Permanent,
            ProviderError::RateLimited { .. } => ErrorCategory::ResourceExhausted,
            ProviderError::BreakerOpen(_) => ErrorCategory::Transient,
            ProviderError::Parse(_) => ErrorCategory::Permanent,
            ProviderError::Configuration(_) => ErrorCategory::Configuration,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after } => {
                (*retry_after).or(Some(Duration::from_secs(30)))
            }
            ProviderError::BreakerOpen(_) => Some(Duration::from_secs(10)),
            _ if self.is_transient() => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_classify_as_resource_exhausted() {
        let err = ProviderError::RateLimited { retry_after: None };
        assert!(err.is_rate_limited());
        assert!(err.is_transient());
    }

    #[test]
    fn server_errors_are_transient_client_errors_are_not() {
        let server = ProviderError::Http {
            status: 503,
            body: "unavailable".into(),
        };
        let client = ProviderError::Http {
            status: 400,
            body: "bad request".into(),
        };
        assert!(server.is_transient());
        assert!(client.is_permanent());
    }

    #[test]
    fn rate_limited_honors_upstream_retry_after() {
        let err = ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(17)),
        };
        assert_eq!(err.suggested_retry_delay(), Some(Duration::from_secs(17)));
    }
}
