// engine.rs - Batch validation, anomaly flagging and quality scoring

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

use super::config::QualityConfig;
use super::detectors::{detect, median_nonzero_volume, CheckContext};
use super::validator::{missing_optional_fields, validate_structure, ValidationError};
use crate::data::{AnomalyKind, Candle, RawCandle, Timeframe, ValidationResult};
use crate::error::{ErrorCategory, ErrorClassification};

/// Failures that reject a whole batch
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum QualityError {
    #[error("Batch for {expected} contains candles for {found}")]
    MixedSymbols { expected: String, found: String },
}

impl ErrorClassification for QualityError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Permanent
    }
}

/// A raw record dropped by the structural checks
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedCandle {
    /// Position in the raw batch
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub reason: ValidationError,
}

/// Outcome of processing one raw batch
#[derive(Debug, Clone, Default)]
pub struct QualityReport {
    /// Valid, deduplicated candles in timestamp order, scored and flagged
    pub candles: Vec<Candle>,
    pub rejected: Vec<RejectedCandle>,
    pub duplicates_dropped: usize,
    /// Raw records that arrived before their predecessor's timestamp
    pub out_of_order: usize,
    pub off_grid: usize,
}

impl QualityReport {
    pub fn validated_count(&self) -> usize {
        self.candles.iter().filter(|c| c.quality.validated).count()
    }

    pub fn flagged_count(&self) -> usize {
        self.candles
            .iter()
            .filter(|c| !c.quality.flags().is_empty())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

/// Composite score: 1.0 minus every penalty, floored at 0.0
pub fn quality_score(missing_fields: usize, flags: &[AnomalyKind], config: &QualityConfig) -> Decimal {
    let missing_penalty = config.missing_field_penalty * Decimal::from(missing_fields);
    let flag_penalty: Decimal = flags.iter().map(|kind| config.penalty_for(*kind)).sum();

    (Decimal::ONE - missing_penalty - flag_penalty)
        .max(Decimal::ZERO)
        .min(Decimal::ONE)
}

/// Stateless validator for raw provider batches
#[derive(Debug, Clone, Default)]
pub struct QualityEngine {
    config: QualityConfig,
}

impl QualityEngine {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Validate, clean and score a batch for one (symbol, timeframe).
    ///
    /// Structurally invalid records are dropped and reported; only a batch
    /// mixing symbols is rejected outright.
    pub fn process(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        raw: &[RawCandle],
    ) -> Result<QualityReport, QualityError> {
        if let Some(stray) = raw.iter().find(|r| r.symbol != symbol) {
            return Err(QualityError::MixedSymbols {
                expected: symbol.to_string(),
                found: stray.symbol.clone(),
            });
        }

        let mut report = QualityReport {
            out_of_order: raw
                .windows(2)
                .filter(|w| w[1].timestamp < w[0].timestamp)
                .count(),
            ..Default::default()
        };

        let mut candles = Vec::with_capacity(raw.len());
        for (index, record) in raw.iter().enumerate() {
            match validate_structure(record, timeframe) {
                Ok(candle) => candles.push(candle),
                Err(reason) => {
                    warn!(
                        symbol = %symbol,
                        timeframe = %timeframe,
                        timestamp = %record.timestamp,
                        error = %reason,
                        "Dropping invalid candle"
                    );
                    report.rejected.push(RejectedCandle {
                        index,
                        timestamp: record.timestamp,
                        reason,
                    });
                }
            }
        }

        // Stable sort keeps the first occurrence of a duplicate timestamp first
        candles.sort_by_key(|c| c.timestamp);
        let before_dedup = candles.len();
        let mut seen = HashSet::with_capacity(candles.len());
        candles.retain(|c| {
            let first = seen.insert(c.timestamp);
            if !first {
                warn!(symbol = %symbol, timestamp = %c.timestamp, "Dropping duplicate candle");
            }
            first
        });
        report.duplicates_dropped = before_dedup - candles.len();

        let volume_median = median_nonzero_volume(&candles);
        let results: Vec<ValidationResult> = candles
            .iter()
            .enumerate()
            .map(|(i, candle)| {
                let previous = i.checked_sub(1).map(|p| &candles[p]);
                self.evaluate(candle, previous, volume_median)
            })
            .collect();

        for (candle, result) in candles.iter_mut().zip(results) {
            candle.quality = result;
        }

        report.off_grid = candles.iter().filter(|c| c.quality.off_grid).count();
        report.candles = candles;

        debug!(
            symbol = %symbol,
            timeframe = %timeframe,
            valid = report.candles.len(),
            rejected = report.rejected.len(),
            duplicates = report.duplicates_dropped,
            validated = report.validated_count(),
            "Quality check complete"
        );

        Ok(report)
    }

    fn evaluate(
        &self,
        candle: &Candle,
        previous: Option<&Candle>,
        volume_median: Option<Decimal>,
    ) -> ValidationResult {
        let ctx = CheckContext {
            candle,
            previous,
            volume_median,
            config: &self.config,
        };
        let flags = detect(&ctx);
        let missing_fields = missing_optional_fields(candle);
        let quality_score = quality_score(missing_fields.len(), &flags, &self.config);

        let mut result = ValidationResult {
            quality_score,
            missing_fields,
            validated: quality_score >= self.config.validated_threshold,
            ..Default::default()
        };
        for kind in flags {
            result.set_flag(kind, true);
        }
        result
    }
}
