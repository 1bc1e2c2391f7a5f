//! Three-state circuit breaker shared by every caller of one dependency.
//!
//! ```text
//!   CLOSED --(failure_threshold consecutive failures)--> OPEN
//!   OPEN --(timeout elapsed, observed on the next call)--> HALF_OPEN
//!   HALF_OPEN --(success_threshold consecutive successes)--> CLOSED
//!   HALF_OPEN --(any failure)--> OPEN (timer restarts)
//! ```
//!
//! Transitions only happen inside [`CircuitBreaker::check`],
//! [`CircuitBreaker::current_state`], [`CircuitBreaker::record_success`] and
//! [`CircuitBreaker::record_failure`], all serialized on one mutex.

use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use candle_common::error::{ErrorCategory, ErrorClassification};

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(name)
    }
}

/// Breaker thresholds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again
    pub success_threshold: u32,
    /// Time spent open before a trial call is allowed
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
        }
    }
}

/// A call was refused without being attempted
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Circuit '{name}' is open, next trial in {retry_in:?}")]
pub struct CircuitOpenError {
    pub name: String,
    pub retry_in: Duration,
}

impl ErrorClassification for CircuitOpenError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Transient
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        Some(self.retry_in)
    }
}

/// Point-in-time view of the breaker's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub since_transition: Duration,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_transition: Instant,
    /// Set while a half-open trial call is outstanding
    trial_started: Option<Instant>,
}

impl BreakerState {
    fn transition(&mut self, to: CircuitState, now: Instant) {
        self.state = to;
        self.last_transition = now;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.trial_started = None;
    }
}

/// Circuit breaker guarding one dependency
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_transition: Instant::now(),
                trial_started: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, moving OPEN to HALF_OPEN once the timeout has elapsed
    pub fn current_state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.expire_open(&mut inner, Instant::now());
        inner.state
    }

    /// Admit or refuse one call.
    ///
    /// While half-open only one trial is admitted at a time; a trial that
    /// never reports back is abandoned after another `timeout`.
    pub fn check(&self) -> Result<(), CircuitOpenError> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        self.expire_open(&mut inner, now);

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => Err(self.open_error(
                (inner.last_transition + self.config.timeout).saturating_duration_since(now),
            )),
            CircuitState::HalfOpen => match inner.trial_started {
                Some(started) if now.saturating_duration_since(started) < self.config.timeout => {
                    Err(self.open_error(Duration::ZERO))
                }
                _ => {
                    inner.trial_started = Some(now);
                    Ok(())
                }
            },
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.trial_started = None;
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.transition(CircuitState::Closed, now);
                    info!(breaker = %self.name, "Circuit closed");
                }
            }
            // Late result from a call admitted before the circuit opened
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    let failures = inner.consecutive_failures;
                    inner.transition(CircuitState::Open, now);
                    warn!(
                        breaker = %self.name,
                        failures,
                        timeout_secs = self.config.timeout.as_secs(),
                        "Circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.transition(CircuitState::Open, now);
                warn!(breaker = %self.name, "Trial call failed, circuit reopened");
            }
            CircuitState::Open => {}
        }
    }

    /// Force the breaker closed
    pub fn reset(&self) {
        self.inner.lock().transition(CircuitState::Closed, Instant::now());
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        self.expire_open(&mut inner, now);

        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            since_transition: now.saturating_duration_since(inner.last_transition),
        }
    }

    fn expire_open(&self, inner: &mut BreakerState, now: Instant) {
        if inner.state == CircuitState::Open
            && now.saturating_duration_since(inner.last_transition) >= self.config.timeout
        {
            inner.transition(CircuitState::HalfOpen, now);
            info!(breaker = %self.name, "Circuit half-open, allowing a trial call");
        }
    }

    fn open_error(&self, retry_in: Duration) -> CircuitOpenError {
        CircuitOpenError {
            name: self.name.clone(),
            retry_in,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("provider", CircuitBreakerConfig::default())
    }

    fn fail_times(breaker: &CircuitBreaker, n: u32) {
        for _ in 0..n {
            assert!(breaker.check().is_ok());
            breaker.record_failure();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let breaker = breaker();

        fail_times(&breaker, 4);
        assert_eq!(breaker.current_state(), CircuitState::Closed);

        fail_times(&breaker, 1);
        assert_eq!(breaker.current_state(), CircuitState::Open);

        let err = breaker.check().unwrap_err();
        assert_eq!(err.name, "provider");
        assert_eq!(err.retry_in, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let breaker = breaker();

        fail_times(&breaker, 4);
        breaker.record_success();
        fail_times(&breaker, 4);

        assert_eq!(breaker.current_state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_timeout_then_closes() {
        let breaker = breaker();
        fail_times(&breaker, 5);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(breaker.check().is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(breaker.check().is_ok());
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);

        // Only one trial at a time
        assert!(breaker.check().is_err());

        breaker.record_success();
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);

        assert!(breaker.check().is_ok());
        breaker.record_success();

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.consecutive_successes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_and_restarts_timer() {
        let breaker = breaker();
        fail_times(&breaker, 5);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(breaker.check().is_ok());
        breaker.record_failure();

        assert_eq!(breaker.current_state(), CircuitState::Open);
        assert_eq!(breaker.check().unwrap_err().retry_in, Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(breaker.current_state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_trial_is_replaced() {
        let breaker = breaker();
        fail_times(&breaker, 5);
        tokio::time::advance(Duration::from_secs(60)).await;

        assert!(breaker.check().is_ok());
        assert!(breaker.check().is_err());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(breaker.check().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_closes() {
        let breaker = breaker();
        fail_times(&breaker, 5);
        breaker.reset();

        assert_eq!(breaker.current_state(), CircuitState::Closed);
        assert!(breaker.check().is_ok());
    }
}
