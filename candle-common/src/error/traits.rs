//! Error classification traits for retry logic and error handling.
//!
//! Errors describe their own retry characteristics so that a single generic
//! retry loop can serve every dependency.

use std::time::Duration;

use super::common::*;

/// Classification of error types for handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient errors that may resolve on retry (network issues, timeouts, 5xx)
    Transient,
    /// Permanent errors that won't resolve on retry (malformed request, 4xx)
    Permanent,
    /// Resource exhaustion errors (rate limits, pool exhausted)
    ResourceExhausted,
    /// Configuration errors (missing config, invalid settings)
    Configuration,
    /// Internal errors (bugs, unexpected state)
    Internal,
}

/// Trait for errors that can classify themselves for retry logic.
pub trait ErrorClassification {
    /// Returns the category of this error
    fn category(&self) -> ErrorCategory;

    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Resource exhaustion counts as transient.
    fn is_transient(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::ResourceExhausted
        )
    }

    /// Returns true if this error is permanent and won't succeed on retry
    fn is_permanent(&self) -> bool {
        matches!(self.category(), ErrorCategory::Permanent)
    }

    /// Returns true if another attempt is allowed after this error
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }

    /// Suggests a delay before retrying, if applicable
    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self.category() {
            ErrorCategory::Transient => Some(Duration::from_millis(100)),
            ErrorCategory::ResourceExhausted => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

impl ErrorClassification for DatabaseError {
    fn category(&self) -> ErrorCategory {
        match self {
            DatabaseError::Connection(_) => ErrorCategory::Transient,
            DatabaseError::PoolExhausted(_) => ErrorCategory::ResourceExhausted,
            DatabaseError::Timeout(_) => ErrorCategory::Transient,
            DatabaseError::Query(_) => ErrorCategory::Permanent, // Usually bad SQL
            DatabaseError::Transaction(_) => ErrorCategory::Transient, // May be deadlock
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            DatabaseError::PoolExhausted(_) => Some(Duration::from_millis(500)),
            DatabaseError::Timeout(_) => Some(Duration::from_millis(100)),
            DatabaseError::Connection(_) => Some(Duration::from_secs(1)),
            DatabaseError::Transaction(_) => Some(Duration::from_millis(50)),
            _ => None,
        }
    }
}

impl ErrorClassification for ConfigurationError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_error_classification() {
        let err = DatabaseError::Connection("refused".to_string());
        assert!(err.is_transient());
        assert!(!err.is_permanent());
        assert!(err.suggested_retry_delay().is_some());

        let err = DatabaseError::Query("syntax error".to_string());
        assert!(!err.is_transient());
        assert!(err.is_permanent());
    }

    #[test]
    fn test_pool_exhausted_is_retryable() {
        let err = DatabaseError::PoolExhausted(Duration::from_secs(30));
        assert_eq!(err.category(), ErrorCategory::ResourceExhausted);
        assert!(err.is_retryable());
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_configuration_error_never_retried() {
        let err = ConfigurationError::invalid_value("retry.max_retries", "must be positive");
        assert!(!err.is_retryable());
        assert_eq!(err.suggested_retry_delay(), None);
        assert_eq!(
            err.to_string(),
            "Invalid value for 'retry.max_retries': must be positive"
        );
    }
}
