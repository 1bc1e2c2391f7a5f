//! Periodic trigger for backfill ticks

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::backfill::{BackfillError, BackfillOrchestrator};

/// Fires the orchestrator every `interval` until shutdown.
///
/// Ticks never overlap; a tick that overruns the interval causes the missed
/// ticks to be skipped rather than queued. Shutdown during a tick requests a
/// graceful stop and waits for the in-flight pairs.
pub struct TickScheduler {
    orchestrator: Arc<BackfillOrchestrator>,
    interval: Duration,
}

impl TickScheduler {
    pub fn new(orchestrator: Arc<BackfillOrchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// Run until `shutdown` fires; returns the number of completed ticks.
    ///
    /// A tick that cannot load its pairs is fatal and ends the loop.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<u64, BackfillError> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks = 0u64;

        info!(interval_secs = self.interval.as_secs(), "Tick scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => break,
            }

            let tick = self.orchestrator.run_tick();
            tokio::pin!(tick);

            let (result, stopping) = tokio::select! {
                result = &mut tick => (result, false),
                _ = shutdown.recv() => {
                    self.orchestrator.request_stop();
                    (tick.await, true)
                }
            };

            match result {
                Ok(summary) => {
                    ticks += 1;
                    if summary.failed > 0 {
                        warn!(%summary, "Backfill tick finished with failures");
                    }
                }
                Err(BackfillError::AlreadyRunning) => {
                    warn!("Skipping scheduled tick: a tick is already running");
                }
                Err(e) => {
                    error!(error = %e, "Backfill tick failed, stopping scheduler");
                    return Err(e);
                }
            }

            if stopping {
                break;
            }
        }

        info!(ticks, "Tick scheduler stopped");
        Ok(ticks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{synthetic_candles, ScriptedFetcher};
    use crate::resilience::{RateLimiterConfig, SlidingWindowRateLimiter};
    use crate::storage::InMemoryCandleStore;
    use crate::symbol::InMemorySymbolRegistry;
    use candle_common::data::{AssetClass, BackfillStatus, Timeframe, TrackedPair};
    use chrono::{TimeZone, Utc};

    fn pairs(symbols: &[&str]) -> Arc<InMemorySymbolRegistry> {
        Arc::new(InMemorySymbolRegistry::with_pairs(
            symbols
                .iter()
                .map(|s| TrackedPair::new(*s, AssetClass::Equity, Timeframe::D1)),
        ))
    }

    fn fetcher(symbols: &[&str]) -> ScriptedFetcher {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        symbols.iter().fold(ScriptedFetcher::new(), |f, s| {
            f.respond(s, Timeframe::D1, Ok(synthetic_candles(s, Timeframe::D1, start, 3)))
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_shutdown() {
        let orchestrator = Arc::new(
            BackfillOrchestrator::builder(
                pairs(&["ABC"]),
                Arc::new(fetcher(&["ABC"])),
                Arc::new(InMemoryCandleStore::new()),
            )
            .build(),
        );
        let scheduler = TickScheduler::new(orchestrator, Duration::from_secs(10));
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move { scheduler.run(rx).await });
        tokio::time::sleep(Duration::from_secs(25)).await;
        tx.send(()).unwrap();

        assert_eq!(handle.await.unwrap().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_outage_is_fatal() {
        let registry = pairs(&["ABC"]);
        registry.set_unavailable(true);
        let orchestrator = Arc::new(
            BackfillOrchestrator::builder(
                registry,
                Arc::new(fetcher(&["ABC"])),
                Arc::new(InMemoryCandleStore::new()),
            )
            .build(),
        );
        let (_tx, rx) = broadcast::channel(1);

        let result = TickScheduler::new(orchestrator, Duration::from_secs(10))
            .run(rx)
            .await;
        assert!(matches!(result, Err(BackfillError::Registry(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_mid_tick_stops_gracefully() {
        let registry = pairs(&["ABC", "XYZ"]);
        let limiter = Arc::new(SlidingWindowRateLimiter::new(RateLimiterConfig::new(
            1,
            Duration::from_secs(60),
        )));
        let orchestrator = Arc::new(
            BackfillOrchestrator::builder(
                registry.clone(),
                Arc::new(fetcher(&["ABC", "XYZ"]).with_latency(Duration::from_secs(2))),
                Arc::new(InMemoryCandleStore::new()),
            )
            .rate_limiter(limiter)
            .build(),
        );
        let scheduler = TickScheduler::new(orchestrator.clone(), Duration::from_secs(300));
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move { scheduler.run(rx).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(()).unwrap();

        assert_eq!(handle.await.unwrap().unwrap(), 1);
        assert!(!orchestrator.is_running());
        assert_eq!(registry.status("ABC", Timeframe::D1), Some(BackfillStatus::Completed));
        assert_eq!(registry.status("XYZ", Timeframe::D1), Some(BackfillStatus::Pending));
    }
}
