//! Scripted fetcher for tests and local runs
//!
//! Responses are queued per (symbol, timeframe). Each call pops the front of
//! the queue; the last queued response is sticky and answers every further
//! call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::provider::{CandleFetcher, FetchError, FetchResult};
use candle_common::data::{RawCandle, Timeframe};

type PairKey = (String, Timeframe);

/// Fetcher returning canned responses
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<PairKey, VecDeque<FetchResult<Vec<RawCandle>>>>>,
    calls: Mutex<HashMap<PairKey, u32>>,
    /// Simulated network latency per call
    pub latency: Option<Duration>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue a response for the pair
    pub fn push(&self, symbol: &str, timeframe: Timeframe, response: FetchResult<Vec<RawCandle>>) {
        self.scripts
            .lock()
            .entry((symbol.to_string(), timeframe))
            .or_default()
            .push_back(response);
    }

    /// Builder form of [`push`](Self::push)
    pub fn respond(
        self,
        symbol: &str,
        timeframe: Timeframe,
        response: FetchResult<Vec<RawCandle>>,
    ) -> Self {
        self.push(symbol, timeframe, response);
        self
    }

    /// Number of fetches issued for the pair
    pub fn calls(&self, symbol: &str, timeframe: Timeframe) -> u32 {
        self.calls
            .lock()
            .get(&(symbol.to_string(), timeframe))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().values().sum()
    }

    fn next_response(&self, key: &PairKey) -> FetchResult<Vec<RawCandle>> {
        let mut scripts = self.scripts.lock();
        match scripts.get_mut(key) {
            Some(queue) if queue.len() > 1 => queue
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::NotFound(key.0.clone()))),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(FetchError::NotFound(key.0.clone()))),
            None => Err(FetchError::NotFound(key.0.clone())),
        }
    }
}

#[async_trait]
impl CandleFetcher for ScriptedFetcher {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> FetchResult<Vec<RawCandle>> {
        let key = (symbol.to_string(), timeframe);
        *self.calls.lock().entry(key.clone()).or_insert(0) += 1;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        self.next_response(&key)
    }
}

/// Generate `count` well-formed consecutive candles starting at `start`.
///
/// Prices drift by a few cents per bar so no anomaly detector fires.
pub fn synthetic_candles(
    symbol: &str,
    timeframe: Timeframe,
    start: DateTime<Utc>,
    count: usize,
) -> Vec<RawCandle> {
    let step = timeframe.duration();
    let mut close = Decimal::new(10_000, 2);

    (0..count)
        .map(|i| {
            let open = close;
            let drift = Decimal::new(((i % 7) as i64 - 3) * 5, 2);
            close = open + drift;
            let high = open.max(close) + Decimal::new(50, 2);
            let low = open.min(close) - Decimal::new(50, 2);

            RawCandle {
                symbol: symbol.to_string(),
                timestamp: start + step * i as i32,
                open: Some(open),
                high: Some(high),
                low: Some(low),
                close: Some(close),
                volume: Some(10_000 + (i % 5) as i64 * 500),
                vwap: Some((open + close) / Decimal::TWO),
                trade_count: Some(250 + (i % 3) as i64 * 10),
            }
        })
        .collect()
}
