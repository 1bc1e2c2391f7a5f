//! Resilience primitives for calls to external dependencies.
//!
//! - [`backoff`]: delay computation between attempts
//! - [`rate_limiter`]: sliding-window admission control
//! - [`circuit_breaker`]: failure isolation per dependency
//! - [`retry`]: the retry loop composing the three

pub mod backoff;
pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use backoff::{compute_delay, BackoffPolicy, BackoffStrategy};
pub use circuit_breaker::{
    BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, CircuitState,
};
pub use rate_limiter::{RateLimiterConfig, SlidingWindowRateLimiter};
pub use retry::{RetryError, RetryOutcome, RetryPolicy, RetryableOperation, StopSignal};
