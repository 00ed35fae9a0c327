//! Error classification traits for retry logic and error handling.
//!
//! These traits allow errors to self-describe their characteristics,
//! enabling generic retry logic without matching on concrete error types
//! at every call site.

use std::time::Duration;

/// Classification of error types for handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient errors that may resolve on retry (network issues, timeouts)
    Transient,
    /// Permanent errors that won't resolve on retry (invalid input, not found)
    Permanent,
    /// Resource exhaustion errors (upstream rate limits, pool exhausted)
    ResourceExhausted,
    /// Configuration errors (missing config, invalid settings)
    Configuration,
    /// Internal errors (bugs, unexpected state)
    Internal,
}

/// Trait for errors that can classify themselves for retry logic.
///
/// Rate-limit responses (`ResourceExhausted`) get a longer suggested delay
/// than generic transient failures, so retry loops can back off harder when
/// the upstream is shedding load.
pub trait ErrorClassification {
    /// Returns the category of this error
    fn category(&self) -> ErrorCategory;

    /// Returns true if this error is transient and may succeed on retry
    fn is_transient(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::ResourceExhausted
        )
    }

    /// Returns true if this error is an upstream rate-limit response
    fn is_rate_limited(&self) -> bool {
        matches!(self.category(), ErrorCategory::ResourceExhausted)
    }

    /// Returns true if this error is permanent and won't succeed on retry
    fn is_permanent(&self) -> bool {
        matches!(self.category(), ErrorCategory::Permanent)
    }

    /// Suggests a delay before retrying, if applicable
    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self.category() {
            ErrorCategory::Transient => Some(Duration::from_millis(500)),
            ErrorCategory::ResourceExhausted => Some(Duration::from_secs(5)),
            _ => None,
        }
    }

    /// Returns the maximum number of retries suggested for this error
    fn max_retries(&self) -> u32 {
        match self.category() {
            ErrorCategory::Transient => 3,
            ErrorCategory::ResourceExhausted => 5,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestError(ErrorCategory);

    impl ErrorClassification for TestError {
        fn category(&self) -> ErrorCategory {
            self.0
        }
    }

    #[test]
    fn transient_errors_are_retryable() {
        let err = TestError(ErrorCategory::Transient);
        assert!(err.is_transient());
        assert!(!err.is_rate_limited());
        assert!(err.suggested_retry_delay().is_some());
    }

    #[test]
    fn rate_limits_back_off_harder() {
        let transient = TestError(ErrorCategory::Transient);
        let rate_limited = TestError(ErrorCategory::ResourceExhausted);
        assert!(rate_limited.is_rate_limited());
        assert!(
            rate_limited.suggested_retry_delay().unwrap()
                > transient.suggested_retry_delay().unwrap()
        );
    }

    #[test]
    fn permanent_errors_get_no_retries() {
        let err = TestError(ErrorCategory::Permanent);
        assert!(!err.is_transient());
        assert_eq!(err.max_retries(), 0);
        assert!(err.suggested_retry_delay().is_none());
    }
}
