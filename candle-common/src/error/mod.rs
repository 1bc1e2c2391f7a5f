//! Error handling shared by the candle crates.
//!
//! This module provides:
//! - Error types for storage and configuration failures
//! - The [`ErrorClassification`] trait the retry layer uses to decide
//!   whether a failure is worth another attempt
//!
//! # Usage
//!
//! ```rust,ignore
//! use candle_common::error::{ErrorClassification, DatabaseError};
//!
//! fn should_retry(err: &impl ErrorClassification) -> bool {
//!     err.is_retryable()
//! }
//!
//! assert!(should_retry(&DatabaseError::PoolExhausted(Duration::from_secs(30))));
//! ```

mod common;
mod traits;

pub use common::*;
pub use traits::*;
