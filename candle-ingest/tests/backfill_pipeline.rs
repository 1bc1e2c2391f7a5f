//! Backfill Pipeline Tests
//!
//! Drive full ticks through the orchestrator with in-memory collaborators:
//! scripted provider, in-memory registry and in-memory candle store.

use std::sync::Arc;
use std::time::Duration;

use candle_common::data::{AssetClass, BackfillStatus, RawCandle, Timeframe, TrackedPair};
use candle_common::data::CacheConfig;
use candle_ingest::backfill::{BackfillError, BackfillOrchestrator, TickMode};
use candle_ingest::provider::{synthetic_candles, FetchError, ScriptedFetcher};
use candle_ingest::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, RateLimiterConfig, RetryPolicy,
    SlidingWindowRateLimiter,
};
use candle_ingest::storage::{CandleQuery, CandleQueryService, CandleStore, InMemoryCandleStore};
use candle_ingest::symbol::InMemorySymbolRegistry;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal_macros::dec;

fn jan(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
}

fn pair(symbol: &str) -> TrackedPair {
    TrackedPair::new(symbol, AssetClass::Equity, Timeframe::D1).with_backfill_from(jan(1))
}

fn quick_retry() -> RetryPolicy {
    let mut policy = RetryPolicy::default();
    policy.backoff.base = Duration::from_millis(10);
    policy.backoff.max_delay = Duration::from_millis(50);
    policy
}

/// Five weekday candles for ABC where the fourth has high below close
fn abc_with_one_bad_bar() -> Vec<RawCandle> {
    let mut candles = synthetic_candles("ABC", Timeframe::D1, jan(1), 5);
    let bad = &mut candles[3];
    bad.high = bad.close.map(|close| close - dec!(1));
    candles
}

struct Harness {
    registry: Arc<InMemorySymbolRegistry>,
    fetcher: Arc<ScriptedFetcher>,
    store: Arc<InMemoryCandleStore>,
}

impl Harness {
    fn new(pairs: Vec<TrackedPair>, fetcher: ScriptedFetcher) -> Self {
        Self {
            registry: Arc::new(InMemorySymbolRegistry::with_pairs(pairs)),
            fetcher: Arc::new(fetcher),
            store: Arc::new(InMemoryCandleStore::new()),
        }
    }

    fn orchestrator(&self) -> BackfillOrchestrator {
        BackfillOrchestrator::builder(
            self.registry.clone(),
            self.fetcher.clone(),
            self.store.clone(),
        )
        .fetch_retry(quick_retry())
        .persist_retry(quick_retry())
        .seed(7)
        .build()
    }

    fn status(&self, symbol: &str) -> Option<BackfillStatus> {
        self.registry.status(symbol, Timeframe::D1)
    }
}

#[tokio::test(start_paused = true)]
async fn test_tick_isolates_failing_pair() {
    let harness = Harness::new(
        vec![pair("ABC"), pair("XYZ")],
        ScriptedFetcher::new()
            .respond("ABC", Timeframe::D1, Ok(abc_with_one_bad_bar()))
            .respond(
                "XYZ",
                Timeframe::D1,
                Err(FetchError::from_status(400, "unknown symbol")),
            ),
    );

    let summary = harness.orchestrator().run_tick().await.unwrap();

    assert_eq!((summary.succeeded, summary.failed, summary.skipped), (1, 1, 0));
    assert_eq!(summary.candles_inserted, 4);
    assert_eq!(summary.candles_rejected, 1);

    assert_eq!(summary.per_pair_errors.len(), 1);
    let failure = &summary.per_pair_errors[0];
    assert_eq!(failure.symbol, "XYZ");
    assert!(!failure.retryable);

    // Client errors are permanent: no retries
    assert_eq!(harness.fetcher.calls("XYZ", Timeframe::D1), 1);
    assert_eq!(harness.status("ABC"), Some(BackfillStatus::Completed));
    assert_eq!(harness.status("XYZ"), Some(BackfillStatus::Failed));

    let stored = harness.store.candles("ABC", Timeframe::D1);
    assert_eq!(stored.len(), 4);
    assert!(stored.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    assert!(stored.iter().all(|c| c.low <= c.open.min(c.close)));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_tick_is_idempotent() {
    let harness = Harness::new(
        vec![pair("ABC")],
        ScriptedFetcher::new().respond("ABC", Timeframe::D1, Ok(abc_with_one_bad_bar())),
    );
    let orchestrator = harness.orchestrator();

    let first = orchestrator.run_tick().await.unwrap();
    let second = orchestrator.run_tick().await.unwrap();

    assert_eq!(first.candles_inserted, 4);
    assert_eq!(second.candles_inserted, 0);
    assert_eq!(second.candles_skipped, 4);
    assert_eq!(second.succeeded, 1);
    assert_eq!(harness.store.len(), 4);
    assert_ne!(first.tick_id, second.tick_id);
}

#[tokio::test(start_paused = true)]
async fn test_resume_picks_up_failed_pair() {
    let harness = Harness::new(
        vec![pair("ABC"), pair("XYZ")],
        ScriptedFetcher::new()
            .respond("ABC", Timeframe::D1, Ok(synthetic_candles("ABC", Timeframe::D1, jan(1), 5)))
            .respond("XYZ", Timeframe::D1, Err(FetchError::from_status(400, "bad request")))
            .respond("XYZ", Timeframe::D1, Ok(synthetic_candles("XYZ", Timeframe::D1, jan(1), 5))),
    );
    let orchestrator = harness.orchestrator();

    let first = orchestrator.run_tick().await.unwrap();
    assert_eq!((first.succeeded, first.failed), (1, 1));

    let resumed = orchestrator.run_tick_with_mode(TickMode::Resume).await.unwrap();

    assert_eq!(resumed.total(), 1);
    assert_eq!(resumed.succeeded, 1);
    assert_eq!(harness.fetcher.calls("ABC", Timeframe::D1), 1);
    assert_eq!(harness.fetcher.calls("XYZ", Timeframe::D1), 2);
    assert_eq!(harness.status("XYZ"), Some(BackfillStatus::Completed));
    assert_eq!(harness.store.len(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_graceful_stop_leaves_unstarted_pairs_pending() {
    let fetcher = ScriptedFetcher::new().with_latency(Duration::from_millis(100));
    for symbol in ["AAA", "BBB", "CCC"] {
        fetcher.push(symbol, Timeframe::D1, Ok(synthetic_candles(symbol, Timeframe::D1, jan(1), 3)));
    }
    let registry = Arc::new(InMemorySymbolRegistry::with_pairs(vec![
        pair("AAA"),
        pair("BBB"),
        pair("CCC"),
    ]));
    let fetcher = Arc::new(fetcher);
    let store = Arc::new(InMemoryCandleStore::new());
    let limiter = Arc::new(SlidingWindowRateLimiter::new(RateLimiterConfig::new(
        1,
        Duration::from_secs(10),
    )));
    let orchestrator = Arc::new(
        BackfillOrchestrator::builder(registry.clone(), fetcher.clone(), store.clone())
            .fetch_retry(quick_retry())
            .rate_limiter(limiter)
            .build(),
    );

    let tick = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run_tick().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    orchestrator.request_stop();

    let summary = tick.await.unwrap().unwrap();

    assert_eq!((summary.succeeded, summary.failed, summary.skipped), (1, 0, 2));
    assert_eq!(fetcher.total_calls(), 1);
    assert_eq!(store.len(), 3);

    let statuses: Vec<BackfillStatus> = ["AAA", "BBB", "CCC"]
        .iter()
        .filter_map(|s| registry.status(s, Timeframe::D1))
        .collect();
    assert_eq!(statuses.iter().filter(|s| **s == BackfillStatus::Completed).count(), 1);
    assert_eq!(statuses.iter().filter(|s| **s == BackfillStatus::Pending).count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_registry_outage_aborts_tick() {
    let harness = Harness::new(vec![pair("ABC")], ScriptedFetcher::new());
    harness.registry.set_unavailable(true);

    let result = harness.orchestrator().run_tick().await;

    assert!(matches!(result, Err(BackfillError::Registry(_))));
    assert_eq!(harness.fetcher.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_store_failures_are_retried() {
    let harness = Harness::new(
        vec![pair("ABC")],
        ScriptedFetcher::new()
            .respond("ABC", Timeframe::D1, Ok(synthetic_candles("ABC", Timeframe::D1, jan(1), 5))),
    );
    harness.store.fail_next_inserts(2);

    let summary = harness.orchestrator().run_tick().await.unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.candles_inserted, 5);
    assert_eq!(harness.store.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_breaker_opens_across_pairs() {
    let harness = Harness::new(
        vec![pair("AAA"), pair("BBB")],
        ScriptedFetcher::new()
            .respond("AAA", Timeframe::D1, Err(FetchError::from_status(503, "unavailable")))
            .respond("BBB", Timeframe::D1, Err(FetchError::from_status(503, "unavailable"))),
    );
    let breaker = Arc::new(CircuitBreaker::new(
        "fetch:scripted",
        CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 1,
            timeout: Duration::from_secs(60),
        },
    ));
    let orchestrator = BackfillOrchestrator::builder(
        harness.registry.clone(),
        harness.fetcher.clone(),
        harness.store.clone(),
    )
    .fetch_retry(quick_retry())
    .fetch_breaker(breaker.clone())
    .build();

    let summary = orchestrator.run_tick().await.unwrap();

    assert_eq!(summary.failed, 2);
    assert!(summary.per_pair_errors.iter().all(|e| e.retryable));
    // Both first attempts trip the breaker; every retry fails fast
    assert_eq!(harness.fetcher.total_calls(), 2);
    assert_eq!(breaker.current_state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_backfilled_candles_served_through_query_cache() {
    let harness = Harness::new(
        vec![pair("ABC")],
        ScriptedFetcher::new().respond("ABC", Timeframe::D1, Ok(abc_with_one_bad_bar())),
    );
    harness.orchestrator().run_tick().await.unwrap();

    let store: Arc<dyn CandleStore> = harness.store.clone();
    let queries = CandleQueryService::new(store, CacheConfig::default());
    let query = CandleQuery::new("ABC", Timeframe::D1, jan(1), jan(5)).validated_only();

    let first = queries.query(&query).await.unwrap();
    let second = queries.query(&query).await.unwrap();

    assert_eq!(first.len(), 4);
    assert!(first.iter().all(|c| c.quality.validated));
    assert_eq!(first, second);
    assert_eq!(queries.cache_stats().hits, 1);
}
