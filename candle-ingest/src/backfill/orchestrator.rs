//! Backfill orchestrator
//!
//! Each tick loads the active tracked pairs and runs one independent task
//! per pair: fetch (rate limited, retried, circuit broken), validate and
//! score, then persist idempotently. A failing pair never aborts the tick;
//! its error lands in the [`TickSummary`].

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::summary::{PairOutcome, PairStats, TickSummary};
use crate::provider::CandleFetcher;
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, RetryError, RetryPolicy, RetryableOperation,
    SlidingWindowRateLimiter, StopSignal,
};
use crate::storage::CandleStore;
use crate::symbol::{RegistryError, SymbolRegistry};
use candle_common::data::{BackfillStatus, Timeframe, TrackedPair};
use candle_common::error::ErrorClassification;
use candle_common::quality::QualityEngine;

/// Which pairs a tick processes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TickMode {
    /// Every active pair; safe because inserts are idempotent
    #[default]
    Full,
    /// Only pairs left pending or failed by earlier runs
    Resume,
}

impl TickMode {
    fn includes(&self, pair: &TrackedPair) -> bool {
        match self {
            TickMode::Full => true,
            TickMode::Resume => pair.backfill_status.needs_resume(),
        }
    }
}

impl fmt::Display for TickMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickMode::Full => f.write_str("full"),
            TickMode::Resume => f.write_str("resume"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackfillConfig {
    /// Fetch window start for pairs without `backfill_from`
    pub default_lookback: ChronoDuration,
    pub mode: TickMode,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            default_lookback: ChronoDuration::days(365),
            mode: TickMode::Full,
        }
    }
}

/// Errors that abort a whole tick
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BackfillError {
    #[error("Could not load tracked pairs: {0}")]
    Registry(#[from] RegistryError),

    #[error("A backfill tick is already running")]
    AlreadyRunning,
}

/// Shared handles one pair task needs
#[derive(Clone)]
struct PairProcessor {
    registry: Arc<dyn SymbolRegistry>,
    fetcher: Arc<dyn CandleFetcher>,
    store: Arc<dyn CandleStore>,
    quality: Arc<QualityEngine>,
    fetch: Arc<RetryableOperation>,
    persist: Arc<RetryableOperation>,
    stop: StopSignal,
    default_lookback: ChronoDuration,
}

impl PairProcessor {
    async fn set_status(&self, pair: &TrackedPair, status: BackfillStatus, error: Option<&str>) {
        if let Err(e) = self
            .registry
            .update_status(&pair.symbol, pair.timeframe, status, error)
            .await
        {
            warn!(pair = %pair, %status, error = %e, "Failed to record backfill status");
        }
    }

    async fn fail(&self, pair: &TrackedPair, error: String, retryable: bool, rejected: usize) -> PairOutcome {
        error!(pair = %pair, %error, retryable, "Backfill failed");
        self.set_status(pair, BackfillStatus::Failed, Some(&error)).await;
        PairOutcome::Failed {
            error,
            retryable,
            rejected,
        }
    }

    async fn process(self, pair: TrackedPair, now: DateTime<Utc>) -> PairOutcome {
        if self.stop.is_requested() {
            debug!(pair = %pair, "Stop requested, leaving pair for the next tick");
            return PairOutcome::Skipped;
        }

        self.set_status(&pair, BackfillStatus::InProgress, None).await;

        let symbol = pair.symbol.as_str();
        let timeframe = pair.timeframe;
        let start = pair.backfill_from.unwrap_or(now - self.default_lookback);
        let end = now;

        let fetcher = &self.fetcher;
        let fetched = self
            .fetch
            .execute(move || fetcher.fetch_range(symbol, timeframe, start, end))
            .await;

        let raw = match fetched.result {
            Ok(raw) => raw,
            Err(RetryError::Cancelled { .. }) => {
                info!(pair = %pair, attempts = fetched.attempts, "Fetch cancelled by stop request");
                self.set_status(&pair, BackfillStatus::Pending, None).await;
                return PairOutcome::Skipped;
            }
            Err(e) => {
                let retryable = e.is_retryable();
                return self.fail(&pair, format!("fetch: {e}"), retryable, 0).await;
            }
        };

        if raw.is_empty() {
            info!(pair = %pair, "No candles in range");
            self.set_status(&pair, BackfillStatus::Completed, None).await;
            return PairOutcome::Completed(PairStats::default());
        }

        let report = match self.quality.process(symbol, timeframe, &raw) {
            Ok(report) => report,
            Err(e) => return self.fail(&pair, format!("validation: {e}"), false, raw.len()).await,
        };
        let rejected = report.rejected.len();

        if report.is_empty() {
            let error = format!("validation: none of {} fetched candles is valid", raw.len());
            return self.fail(&pair, error, false, rejected).await;
        }

        let store = &self.store;
        let candles = report.candles.as_slice();
        let persisted = self
            .persist
            .execute(move || store.insert_batch(symbol, timeframe, candles))
            .await;

        match persisted.result {
            Ok(outcome) => {
                info!(
                    pair = %pair,
                    fetched = raw.len(),
                    inserted = outcome.inserted,
                    already_stored = outcome.skipped,
                    rejected,
                    validated = report.validated_count(),
                    flagged = report.flagged_count(),
                    "Backfill completed"
                );
                self.set_status(&pair, BackfillStatus::Completed, None).await;
                PairOutcome::Completed(PairStats {
                    inserted: outcome.inserted,
                    skipped: outcome.skipped,
                    rejected,
                })
            }
            Err(e) => {
                let retryable = e.is_retryable();
                self.fail(&pair, format!("persist: {e}"), retryable, rejected).await
            }
        }
    }
}

/// Clears the running flag when a tick ends, however it ends
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives backfill ticks over the tracked pairs
pub struct BackfillOrchestrator {
    processor: PairProcessor,
    config: BackfillConfig,
    running: AtomicBool,
}

impl fmt::Debug for BackfillOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackfillOrchestrator")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish()
    }
}

impl BackfillOrchestrator {
    pub fn builder(
        registry: Arc<dyn SymbolRegistry>,
        fetcher: Arc<dyn CandleFetcher>,
        store: Arc<dyn CandleStore>,
    ) -> BackfillOrchestratorBuilder {
        BackfillOrchestratorBuilder {
            registry,
            fetcher,
            store,
            quality: None,
            fetch_retry: RetryPolicy::default(),
            persist_retry: RetryPolicy::default(),
            fetch_breaker: None,
            storage_breaker: None,
            rate_limiter: None,
            config: BackfillConfig::default(),
            seed: None,
        }
    }

    pub fn config(&self) -> &BackfillConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the running tick to stop: in-flight pairs finish, the rest are
    /// skipped and stay pending
    pub fn request_stop(&self) {
        if self.is_running() {
            info!("Graceful stop requested for running backfill tick");
        }
        self.processor.stop.request();
    }

    pub fn fetch_breaker(&self) -> &Arc<CircuitBreaker> {
        self.processor.fetch.breaker()
    }

    pub fn storage_breaker(&self) -> &Arc<CircuitBreaker> {
        self.processor.persist.breaker()
    }

    /// Run one tick in the configured mode
    pub async fn run_tick(&self) -> Result<TickSummary, BackfillError> {
        self.run_tick_with_mode(self.config.mode).await
    }

    pub async fn run_tick_with_mode(&self, mode: TickMode) -> Result<TickSummary, BackfillError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BackfillError::AlreadyRunning);
        }
        let _running = RunningGuard(&self.running);
        self.processor.stop.reset();

        let started_at = Utc::now();
        let clock = Instant::now();

        let pairs = self.processor.registry.list_active_pairs().await.map_err(|e| {
            error!(error = %e, "Backfill tick aborted: registry unavailable");
            e
        })?;
        let pairs: Vec<TrackedPair> = pairs.into_iter().filter(|p| mode.includes(p)).collect();

        let mut summary = TickSummary::new(started_at);
        let tick_id = summary.tick_id;
        info!(%tick_id, pairs = pairs.len(), %mode, "Starting backfill tick");

        let handles: Vec<(String, Timeframe, JoinHandle<PairOutcome>)> = pairs
            .into_iter()
            .map(|pair| {
                let symbol = pair.symbol.clone();
                let timeframe = pair.timeframe;
                let task = tokio::spawn(self.processor.clone().process(pair, started_at));
                (symbol, timeframe, task)
            })
            .collect();

        for (symbol, timeframe, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(%symbol, %timeframe, error = %e, "Pair task aborted");
                    PairOutcome::Failed {
                        error: format!("task aborted: {e}"),
                        retryable: true,
                        rejected: 0,
                    }
                }
            };
            summary.record(&symbol, timeframe, outcome);
        }
        summary.elapsed = clock.elapsed();

        info!(
            %tick_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            inserted = summary.candles_inserted,
            rejected = summary.candles_rejected,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Backfill tick finished"
        );
        Ok(summary)
    }
}

/// Builder for [`BackfillOrchestrator`]
pub struct BackfillOrchestratorBuilder {
    registry: Arc<dyn SymbolRegistry>,
    fetcher: Arc<dyn CandleFetcher>,
    store: Arc<dyn CandleStore>,
    quality: Option<Arc<QualityEngine>>,
    fetch_retry: RetryPolicy,
    persist_retry: RetryPolicy,
    fetch_breaker: Option<Arc<CircuitBreaker>>,
    storage_breaker: Option<Arc<CircuitBreaker>>,
    rate_limiter: Option<Arc<SlidingWindowRateLimiter>>,
    config: BackfillConfig,
    seed: Option<u64>,
}

impl BackfillOrchestratorBuilder {
    pub fn quality_engine(mut self, engine: Arc<QualityEngine>) -> Self {
        self.quality = Some(engine);
        self
    }

    /// Retry policy for provider fetches; its attempt timeout bounds each fetch
    pub fn fetch_retry(mut self, policy: RetryPolicy) -> Self {
        self.fetch_retry = policy;
        self
    }

    pub fn persist_retry(mut self, policy: RetryPolicy) -> Self {
        self.persist_retry = policy;
        self
    }

    pub fn fetch_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.fetch_breaker = Some(breaker);
        self
    }

    pub fn storage_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.storage_breaker = Some(breaker);
        self
    }

    pub fn rate_limiter(mut self, limiter: Arc<SlidingWindowRateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn config(mut self, config: BackfillConfig) -> Self {
        self.config = config;
        self
    }

    /// Seed backoff jitter for reproducible runs
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> BackfillOrchestrator {
        let stop = StopSignal::new();

        let fetch_breaker = self.fetch_breaker.unwrap_or_else(|| {
            Arc::new(CircuitBreaker::new(
                format!("fetch:{}", self.fetcher.name()),
                CircuitBreakerConfig::default(),
            ))
        });
        let storage_breaker = self.storage_breaker.unwrap_or_else(|| {
            Arc::new(CircuitBreaker::new("storage", CircuitBreakerConfig::default()))
        });

        let mut fetch =
            RetryableOperation::new(self.fetch_retry, fetch_breaker).with_stop_signal(stop.clone());
        if let Some(limiter) = self.rate_limiter {
            fetch = fetch.with_rate_limiter(limiter);
        }
        // Persisting is never cancelled; an in-flight pair always finishes
        let mut persist = RetryableOperation::new(self.persist_retry, storage_breaker);
        if let Some(seed) = self.seed {
            fetch = fetch.with_seed(seed);
            persist = persist.with_seed(seed.wrapping_add(1));
        }

        BackfillOrchestrator {
            processor: PairProcessor {
                registry: self.registry,
                fetcher: self.fetcher,
                store: self.store,
                quality: self.quality.unwrap_or_default(),
                fetch: Arc::new(fetch),
                persist: Arc::new(persist),
                stop,
                default_lookback: self.config.default_lookback,
            },
            config: self.config,
            running: AtomicBool::new(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{synthetic_candles, FetchError, ScriptedFetcher};
    use crate::storage::InMemoryCandleStore;
    use crate::symbol::InMemorySymbolRegistry;
    use candle_common::data::AssetClass;
    use chrono::TimeZone;
    use std::time::Duration;

    fn jan(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn quick_retry() -> RetryPolicy {
        let mut policy = RetryPolicy::default();
        policy.backoff.base = Duration::from_millis(10);
        policy.backoff.max_delay = Duration::from_millis(50);
        policy
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_mode_only_touches_unfinished_pairs() {
        let registry = Arc::new(InMemorySymbolRegistry::with_pairs([
            TrackedPair::new("AAA", AssetClass::Equity, Timeframe::D1)
                .with_status(BackfillStatus::Completed),
            TrackedPair::new("BBB", AssetClass::Equity, Timeframe::D1)
                .with_status(BackfillStatus::Failed),
            TrackedPair::new("CCC", AssetClass::Equity, Timeframe::D1),
        ]));
        let fetcher = Arc::new(
            ScriptedFetcher::new()
                .respond("AAA", Timeframe::D1, Ok(synthetic_candles("AAA", Timeframe::D1, jan(1), 5)))
                .respond("BBB", Timeframe::D1, Ok(synthetic_candles("BBB", Timeframe::D1, jan(1), 5)))
                .respond("CCC", Timeframe::D1, Ok(synthetic_candles("CCC", Timeframe::D1, jan(1), 5))),
        );
        let orchestrator =
            BackfillOrchestrator::builder(registry.clone(), fetcher.clone(), Arc::new(InMemoryCandleStore::new()))
                .fetch_retry(quick_retry())
                .build();

        let summary = orchestrator.run_tick_with_mode(TickMode::Resume).await.unwrap();

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.total(), 2);
        assert_eq!(fetcher.calls("AAA", Timeframe::D1), 0);
        assert_eq!(registry.status("BBB", Timeframe::D1), Some(BackfillStatus::Completed));
        assert_eq!(registry.status("CCC", Timeframe::D1), Some(BackfillStatus::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_tick_rejected() {
        let registry = Arc::new(InMemorySymbolRegistry::with_pairs([TrackedPair::new(
            "ABC",
            AssetClass::Equity,
            Timeframe::D1,
        )]));
        let fetcher = Arc::new(
            ScriptedFetcher::new()
                .with_latency(Duration::from_secs(1))
                .respond("ABC", Timeframe::D1, Ok(vec![])),
        );
        let orchestrator = Arc::new(
            BackfillOrchestrator::builder(registry, fetcher, Arc::new(InMemoryCandleStore::new()))
                .build(),
        );

        let first = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.run_tick().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(orchestrator.is_running());
        assert!(matches!(
            orchestrator.run_tick().await,
            Err(BackfillError::AlreadyRunning)
        ));

        let summary = first.await.unwrap().unwrap();
        assert_eq!(summary.succeeded, 1);
        assert!(!orchestrator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_fetch_failures_retried_within_tick() {
        let registry = Arc::new(InMemorySymbolRegistry::with_pairs([TrackedPair::new(
            "ABC",
            AssetClass::Equity,
            Timeframe::D1,
        )]));
        let fetcher = Arc::new(
            ScriptedFetcher::new()
                .respond("ABC", Timeframe::D1, Err(FetchError::from_status(503, "busy")))
                .respond("ABC", Timeframe::D1, Err(FetchError::Timeout(Duration::from_secs(5))))
                .respond("ABC", Timeframe::D1, Ok(synthetic_candles("ABC", Timeframe::D1, jan(1), 3))),
        );
        let store = Arc::new(InMemoryCandleStore::new());
        let orchestrator = BackfillOrchestrator::builder(registry, fetcher.clone(), store.clone())
            .fetch_retry(quick_retry())
            .build();

        let summary = orchestrator.run_tick().await.unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(fetcher.calls("ABC", Timeframe::D1), 3);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_and_all_invalid_batches() {
        let registry = Arc::new(InMemorySymbolRegistry::with_pairs([
            TrackedPair::new("EMPTY", AssetClass::Equity, Timeframe::D1),
            TrackedPair::new("JUNK", AssetClass::Equity, Timeframe::D1),
        ]));
        let mut junk = synthetic_candles("JUNK", Timeframe::D1, jan(1), 2);
        for raw in &mut junk {
            raw.close = None;
        }
        let fetcher = Arc::new(
            ScriptedFetcher::new()
                .respond("EMPTY", Timeframe::D1, Ok(vec![]))
                .respond("JUNK", Timeframe::D1, Ok(junk)),
        );
        let orchestrator =
            BackfillOrchestrator::builder(registry.clone(), fetcher, Arc::new(InMemoryCandleStore::new()))
                .build();

        let summary = orchestrator.run_tick().await.unwrap();

        assert_eq!((summary.succeeded, summary.failed), (1, 1));
        assert_eq!(summary.candles_rejected, 2);
        assert_eq!(summary.per_pair_errors[0].symbol, "JUNK");
        assert_eq!(registry.status("EMPTY", Timeframe::D1), Some(BackfillStatus::Completed));
        assert_eq!(registry.status("JUNK", Timeframe::D1), Some(BackfillStatus::Failed));
    }
}
