//! Bounded retries guarded by a circuit breaker and an optional rate limiter.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::backoff::BackoffPolicy;
use super::circuit_breaker::{CircuitBreaker, CircuitOpenError};
use super::rate_limiter::SlidingWindowRateLimiter;
use candle_common::error::{ErrorCategory, ErrorClassification};

/// Retry limits for one kind of operation
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
    /// Per-attempt deadline; expiry counts as a transient failure
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffPolicy::default(),
            attempt_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Why a retried operation gave up
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The last error returned by the operation
    #[error("{0}")]
    Operation(E),

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("Attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Stop requested before attempt {attempt}")]
    Cancelled { attempt: u32 },
}

impl<E: ErrorClassification> ErrorClassification for RetryError<E> {
    fn category(&self) -> ErrorCategory {
        match self {
            RetryError::Operation(err) => err.category(),
            RetryError::CircuitOpen(_) | RetryError::Timeout(_) => ErrorCategory::Transient,
            RetryError::Cancelled { .. } => ErrorCategory::Internal,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            RetryError::Operation(err) => err.suggested_retry_delay(),
            RetryError::CircuitOpen(err) => err.suggested_retry_delay(),
            RetryError::Timeout(_) => Some(Duration::from_millis(100)),
            RetryError::Cancelled { .. } => None,
        }
    }
}

/// Result of [`RetryableOperation::execute`]
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, RetryError<E>>,
    /// Times the operation was actually invoked
    pub attempts: u32,
    /// Sum of the backoff sleeps
    pub total_delay: Duration,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn last_error(&self) -> Option<&RetryError<E>> {
        self.result.as_ref().err()
    }

    pub fn into_result(self) -> Result<T, RetryError<E>> {
        self.result
    }
}

/// Shared "stop requested" flag checked between attempts
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs fallible async operations with retries, backoff and fail-fast on an
/// open circuit
pub struct RetryableOperation {
    policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
    rate_limiter: Option<Arc<SlidingWindowRateLimiter>>,
    stop: Option<StopSignal>,
    rng: Mutex<StdRng>,
}

impl fmt::Debug for RetryableOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryableOperation")
            .field("policy", &self.policy)
            .field("breaker", &self.breaker.name())
            .field("rate_limited", &self.rate_limiter.is_some())
            .finish()
    }
}

impl RetryableOperation {
    pub fn new(policy: RetryPolicy, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            policy,
            breaker,
            rate_limiter: None,
            stop: None,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Take a rate-limiter slot before every attempt
    pub fn with_rate_limiter(mut self, limiter: Arc<SlidingWindowRateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Seed the jitter generator for reproducible delays
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run `op` until it succeeds, fails permanently, the circuit is open,
    /// a stop is requested, or `max_retries` retries are used up.
    ///
    /// Only retryable failures are recorded against the breaker; a
    /// non-retryable answer still proves the dependency is reachable and is
    /// recorded as a success.
    pub async fn execute<T, E, F, Fut>(&self, mut op: F) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ErrorClassification + fmt::Display,
    {
        let mut attempt = 0u32;
        let mut total_delay = Duration::ZERO;

        let finish = |result, attempts, total_delay| RetryOutcome {
            result,
            attempts,
            total_delay,
        };

        loop {
            if self.stop_requested() {
                return finish(Err(RetryError::Cancelled { attempt }), attempt, total_delay);
            }

            if let Err(open) = self.breaker.check() {
                debug!(breaker = %open.name, retry_in = ?open.retry_in, "Failing fast on open circuit");
                return finish(Err(open.into()), attempt, total_delay);
            }

            if let Some(limiter) = &self.rate_limiter {
                limiter.acquire().await;
                if self.stop_requested() {
                    return finish(Err(RetryError::Cancelled { attempt }), attempt, total_delay);
                }
            }

            let result = match self.policy.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, op()).await {
                    Ok(result) => result.map_err(RetryError::Operation),
                    Err(_) => Err(RetryError::Timeout(limit)),
                },
                None => op().await.map_err(RetryError::Operation),
            };
            let attempts = attempt + 1;

            let err = match result {
                Ok(value) => {
                    self.breaker.record_success();
                    return finish(Ok(value), attempts, total_delay);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                self.breaker.record_success();
                debug!(attempt = attempts, error = %err, "Permanent failure, not retrying");
                return finish(Err(err), attempts, total_delay);
            }

            self.breaker.record_failure();

            if attempt >= self.policy.max_retries {
                warn!(attempts, error = %err, "Retries exhausted");
                return finish(Err(err), attempts, total_delay);
            }

            let backoff = {
                let mut rng = self.rng.lock();
                self.policy.backoff.delay(attempt, &mut *rng)
            };
            let hint = err.suggested_retry_delay();
            let delay = retry_delay(backoff, hint, self.policy.backoff.max_delay);
            warn!(
                attempt = attempts,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                hint_ms = hint.map(|h| h.as_millis() as u64),
                error = %err,
                "Transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
            total_delay += delay;
            attempt += 1;
        }
    }

    fn stop_requested(&self) -> bool {
        self.stop.as_ref().is_some_and(StopSignal::is_requested)
    }
}

/// Wait at least as long as the error asks, never past `max_delay`
fn retry_delay(backoff: Duration, hint: Option<Duration>, max_delay: Duration) -> Duration {
    hint.map_or(backoff, |hint| backoff.max(hint)).min(max_delay)
}
