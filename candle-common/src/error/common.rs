//! Common error types shared across crates.
//!
//! Crate-specific errors wrap these using `#[from]`.

use std::time::Duration;
use thiserror::Error;

/// Database-related errors.
///
/// Covers queries, connections, transactions and the connection pool.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DatabaseError {
    /// Query execution failed
    #[error("Query failed: {0}")]
    Query(String),

    /// Connection to database failed
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Transaction failed (begin, commit, rollback)
    #[error("Transaction failed: {0}")]
    Transaction(String),

    /// Every pooled and overflow connection is checked out
    #[error("Connection pool exhausted after waiting {0:?}")]
    PoolExhausted(Duration),

    /// Query timeout
    #[error("Query timeout after {0:?}")]
    Timeout(Duration),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => DatabaseError::PoolExhausted(Duration::ZERO),
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolClosed => {
                DatabaseError::Connection(err.to_string())
            }
            _ => DatabaseError::Query(err.to_string()),
        }
    }
}

/// Configuration-related errors.
///
/// Raised while loading and validating settings at start-up.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// Required field is missing
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Field has invalid value
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// Configuration source could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid configuration combination
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigurationError {
    /// Shorthand for [`ConfigurationError::InvalidValue`].
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigurationError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
