//! Sliding-window admission control for calls to the upstream provider.
//!
//! The limiter keeps the instants of admitted calls and prunes those older
//! than the window on every check, so at most `max_requests` calls are
//! admitted within any window-long span.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Rate limiter configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Calls admitted per window
    pub max_requests: u32,
    /// Window length
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimiterConfig {
    /// A zero `max_requests` is raised to one
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
        }
    }
}

/// Task-safe sliding-window rate limiter
#[derive(Debug)]
pub struct SlidingWindowRateLimiter {
    config: RateLimiterConfig,
    admitted: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowRateLimiter {
    /// Zero `max_requests` is raised to one
    pub fn new(mut config: RateLimiterConfig) -> Self {
        if config.max_requests == 0 {
            warn!(window = ?config.window, "Rate limiter max_requests is 0, admitting 1 per window");
            config.max_requests = 1;
        }
        Self {
            admitted: Mutex::new(VecDeque::with_capacity(config.max_requests as usize)),
            config,
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Wait until a slot is free, then take it.
    ///
    /// The lock is only held while inspecting the window, never across the
    /// sleep, so waiting callers do not block `next_available_time`.
    pub async fn acquire(&self) {
        loop {
            let ready_at = {
                let mut admitted = self.admitted.lock();
                let now = Instant::now();
                self.prune(&mut admitted, now);

                if admitted.len() < self.config.max_requests as usize {
                    admitted.push_back(now);
                    return;
                }
                self.slot_frees_at(&admitted, now)
            };

            debug!(
                wait_ms = ready_at.saturating_duration_since(Instant::now()).as_millis() as u64,
                "Rate limit reached, waiting for a free slot"
            );
            tokio::time::sleep_until(ready_at).await;
        }
    }

    /// Take a slot if one is free right now
    pub fn try_acquire(&self) -> bool {
        let mut admitted = self.admitted.lock();
        let now = Instant::now();
        self.prune(&mut admitted, now);

        if admitted.len() < self.config.max_requests as usize {
            admitted.push_back(now);
            true
        } else {
            false
        }
    }

    /// Earliest instant at which `acquire` would succeed without waiting
    pub fn next_available_time(&self) -> Instant {
        let mut admitted = self.admitted.lock();
        let now = Instant::now();
        self.prune(&mut admitted, now);

        if admitted.len() < self.config.max_requests as usize {
            now
        } else {
            self.slot_frees_at(&admitted, now)
        }
    }

    /// Slots free right now
    pub fn available_permits(&self) -> usize {
        let mut admitted = self.admitted.lock();
        self.prune(&mut admitted, Instant::now());
        (self.config.max_requests as usize).saturating_sub(admitted.len())
    }

    fn prune(&self, admitted: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = admitted.front() {
            if now.saturating_duration_since(*oldest) >= self.config.window {
                admitted.pop_front();
            } else {
                break;
            }
        }
    }

    /// When the window is full, the oldest admission expiring frees a slot
    fn slot_frees_at(&self, admitted: &VecDeque<Instant>, now: Instant) -> Instant {
        let overflow = admitted.len() + 1 - self.config.max_requests as usize;
        admitted
            .get(overflow - 1)
            .map(|oldest| *oldest + self.config.window)
            .unwrap_or(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter(max_requests: u32, window_ms: u64) -> SlidingWindowRateLimiter {
        SlidingWindowRateLimiter::new(RateLimiterConfig::new(
            max_requests,
            Duration::from_millis(window_ms),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_respects_window() {
        let limiter = limiter(2, 1000);
        let start = Instant::now();

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.available_permits(), 0);
        assert_eq!(limiter.next_available_time(), start + Duration::from_millis(1000));

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert_eq!(limiter.available_permits(), 2);
        assert!(limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides_per_admission() {
        let limiter = limiter(2, 1000);

        assert!(limiter.try_acquire());
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(limiter.try_acquire());

        // The first admission expires at 1000ms, the second at 1600ms
        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_suspends_until_slot_frees() {
        let limiter = limiter(1, 500);
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[test]
    fn test_zero_max_requests_raised_to_one() {
        assert_eq!(
            RateLimiterConfig::new(0, Duration::from_secs(1)).max_requests,
            1
        );

        let literal = RateLimiterConfig {
            max_requests: 0,
            window: Duration::from_secs(1),
        };
        assert_eq!(SlidingWindowRateLimiter::new(literal).config().max_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_max_requests_acquire_waits_for_window() {
        let limiter = SlidingWindowRateLimiter::new(RateLimiterConfig {
            max_requests: 0,
            window: Duration::from_millis(500),
        });
        let start = Instant::now();

        limiter.acquire().await;
        assert!(!limiter.try_acquire());
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_millis(500));
        assert!(start.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_never_exceed_limit() {
        let limiter = Arc::new(limiter(3, 1000));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..9 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now().duration_since(start)
            }));
        }

        let mut admitted_at = Vec::new();
        for handle in handles {
            admitted_at.push(handle.await.unwrap());
        }
        admitted_at.sort();

        // Any four consecutive admissions span at least one full window
        for window in admitted_at.windows(4) {
            assert!(window[3] - window[0] >= Duration::from_millis(1000));
        }
    }
}
