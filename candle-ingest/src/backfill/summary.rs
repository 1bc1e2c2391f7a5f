//! Per-tick backfill results

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use candle_common::data::Timeframe;

/// Failure captured for one pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairError {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub error: String,
    /// Whether the next tick may succeed without intervention
    pub retryable: bool,
}

/// Candle counts for a pair that completed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PairStats {
    pub inserted: usize,
    pub skipped: usize,
    pub rejected: usize,
}

/// How one pair ended within a tick
#[derive(Debug, Clone, PartialEq)]
pub enum PairOutcome {
    Completed(PairStats),
    Failed {
        error: String,
        retryable: bool,
        rejected: usize,
    },
    /// Not attempted because a stop was requested
    Skipped,
}

/// Aggregated result of one orchestrator tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickSummary {
    /// Correlates the tick's log lines
    pub tick_id: Uuid,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub per_pair_errors: Vec<PairError>,
    pub candles_inserted: usize,
    /// Rows already present in storage
    pub candles_skipped: usize,
    /// Raw records dropped by structural validation
    pub candles_rejected: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl TickSummary {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            tick_id: Uuid::new_v4(),
            succeeded: 0,
            failed: 0,
            skipped: 0,
            per_pair_errors: Vec::new(),
            candles_inserted: 0,
            candles_skipped: 0,
            candles_rejected: 0,
            started_at,
            elapsed: Duration::ZERO,
        }
    }

    pub fn record(&mut self, symbol: &str, timeframe: Timeframe, outcome: PairOutcome) {
        match outcome {
            PairOutcome::Completed(stats) => {
                self.succeeded += 1;
                self.candles_inserted += stats.inserted;
                self.candles_skipped += stats.skipped;
                self.candles_rejected += stats.rejected;
            }
            PairOutcome::Failed {
                error,
                retryable,
                rejected,
            } => {
                self.failed += 1;
                self.candles_rejected += rejected;
                self.per_pair_errors.push(PairError {
                    symbol: symbol.to_string(),
                    timeframe,
                    error,
                    retryable,
                });
            }
            PairOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

impl fmt::Display for TickSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pairs: {} succeeded, {} failed, {} skipped; {} candles inserted, {} already stored, {} rejected in {:.2}s",
            self.total(),
            self.succeeded,
            self.failed,
            self.skipped,
            self.candles_inserted,
            self.candles_skipped,
            self.candles_rejected,
            self.elapsed.as_secs_f64()
        )
    }
}
