//! Retry delay computation.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lower and upper jitter scaling factors
pub const JITTER_RANGE: (f64, f64) = (0.8, 1.2);

/// How the delay grows with the attempt number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `base * 2^attempt`
    #[default]
    Exponential,
    /// `base * attempt`
    Linear,
    /// `base`
    Fixed,
}

/// Compute the delay before the retry that follows failed attempt `attempt`
/// (zero-based).
///
/// The result never exceeds `max_cap`, with or without jitter. Jitter scales
/// the capped delay uniformly within [`JITTER_RANGE`] using `rng`, so a seeded
/// generator yields a reproducible sequence.
pub fn compute_delay<R: Rng + ?Sized>(
    attempt: u32,
    strategy: BackoffStrategy,
    base: Duration,
    max_cap: Duration,
    jitter: bool,
    rng: &mut R,
) -> Duration {
    let raw = match strategy {
        BackoffStrategy::Exponential => base.saturating_mul(2u32.saturating_pow(attempt)),
        BackoffStrategy::Linear => base.saturating_mul(attempt),
        BackoffStrategy::Fixed => base,
    };
    let capped = raw.min(max_cap);

    if !jitter {
        return capped;
    }

    let factor = rng.gen_range(JITTER_RANGE.0..=JITTER_RANGE.1);
    Duration::try_from_secs_f64(capped.as_secs_f64() * factor)
        .unwrap_or(max_cap)
        .min(max_cap)
}

/// Backoff settings bundled for a retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub strategy: BackoffStrategy,
    pub base: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        compute_delay(
            attempt,
            self.strategy,
            self.base,
            self.max_delay,
            self.jitter,
            rng,
        )
    }

    /// Same policy with jitter disabled
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }
}
