//! Fetcher trait definitions
//!
//! A fetcher adapts one upstream market-data provider. It returns raw,
//! unvalidated candles and classifies its failures so the retry loop can
//! tell transient outages from permanent rejections.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use candle_common::data::{RawCandle, Timeframe};
use candle_common::error::{ErrorCategory, ErrorClassification};

/// Fetch error types
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum FetchError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Client error {status}: {message}")]
    Client { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Symbol not found: {0}")]
    NotFound(String),
}

impl FetchError {
    /// Map a non-success HTTP status onto the error taxonomy
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => FetchError::RateLimited { retry_after: None },
            404 => FetchError::NotFound(message),
            500..=599 => FetchError::Server { status, message },
            _ => FetchError::Client { status, message },
        }
    }
}

impl ErrorClassification for FetchError {
    fn category(&self) -> ErrorCategory {
        match self {
            FetchError::Timeout(_) => ErrorCategory::Transient,
            FetchError::Network(_) => ErrorCategory::Transient,
            FetchError::Server { .. } => ErrorCategory::Transient,
            FetchError::RateLimited { .. } => ErrorCategory::ResourceExhausted,
            FetchError::Client { .. } => ErrorCategory::Permanent,
            FetchError::Malformed(_) => ErrorCategory::Permanent,
            FetchError::NotFound(_) => ErrorCategory::Permanent,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            FetchError::Timeout(_) => Some(Duration::from_millis(500)),
            FetchError::Network(_) => Some(Duration::from_secs(2)),
            FetchError::Server { .. } => Some(Duration::from_secs(1)),
            FetchError::RateLimited { retry_after } => {
                Some(retry_after.unwrap_or(Duration::from_secs(60)))
            }
            _ => None,
        }
    }
}

pub type FetchResult<T> = Result<T, FetchError>;

/// Upstream candle source
#[async_trait]
pub trait CandleFetcher: Send + Sync {
    /// Provider name used in logs and breaker names
    fn name(&self) -> &str;

    /// Fetch raw candles for `symbol` at `timeframe` in `[start, end]`
    async fn fetch_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> FetchResult<Vec<RawCandle>>;
}
