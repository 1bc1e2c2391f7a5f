// types.rs - Candle, timeframe and tracked-pair data model

use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while parsing data-model enums from text
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum DataError {
    #[error("Invalid {kind}: '{value}'")]
    Parse { kind: &'static str, value: String },
}

impl DataError {
    fn parse(kind: &'static str, value: &str) -> Self {
        DataError::Parse {
            kind,
            value: value.to_string(),
        }
    }
}

// =================================================================
// Timeframe
// =================================================================

/// Candle bucketing interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
    W1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
        }
    }

    /// Length of one bucket
    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::M1 => Duration::minutes(1),
            Timeframe::M5 => Duration::minutes(5),
            Timeframe::M15 => Duration::minutes(15),
            Timeframe::M30 => Duration::minutes(30),
            Timeframe::H1 => Duration::hours(1),
            Timeframe::H4 => Duration::hours(4),
            Timeframe::D1 => Duration::days(1),
            Timeframe::W1 => Duration::weeks(1),
        }
    }

    pub fn is_intraday(&self) -> bool {
        self.duration() < Duration::days(1)
    }

    /// Whether `ts` sits on this timeframe's grid.
    ///
    /// Intraday and daily buckets are aligned to the Unix epoch; weekly
    /// buckets open on Monday 00:00 UTC.
    pub fn is_aligned(&self, ts: DateTime<Utc>) -> bool {
        if ts.nanosecond() != 0 {
            return false;
        }
        match self {
            Timeframe::W1 => ts.weekday() == Weekday::Mon && ts.num_seconds_from_midnight() == 0,
            _ => ts.timestamp().rem_euclid(self.duration().num_seconds()) == 0,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1m" | "1min" => Ok(Timeframe::M1),
            "5m" | "5min" => Ok(Timeframe::M5),
            "15m" | "15min" => Ok(Timeframe::M15),
            "30m" | "30min" => Ok(Timeframe::M30),
            "1h" | "60m" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" | "d" | "daily" => Ok(Timeframe::D1),
            "1w" | "w" | "weekly" => Ok(Timeframe::W1),
            _ => Err(DataError::parse("timeframe", s)),
        }
    }
}

impl TryFrom<String> for Timeframe {
    type Error = DataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.as_str().to_string()
    }
}

// =================================================================
// Raw and validated candles
// =================================================================

/// Candle as delivered by an upstream provider, before validation.
///
/// Every price field is optional so that null values can be detected and
/// rejected instead of failing deserialization of the whole batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCandle {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub volume: Option<i64>,
    /// Volume-weighted average price; non-critical
    #[serde(default)]
    pub vwap: Option<Decimal>,
    /// Number of trades in the bucket; non-critical
    #[serde(default)]
    pub trade_count: Option<i64>,
}

/// Anomaly kinds the quality engine can flag on a candle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    PriceSpike,
    IntradayRange,
    ReverseSplit,
    VolumeAnomaly,
    Gap,
    OffGrid,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::PriceSpike => "price_spike",
            AnomalyKind::IntradayRange => "intraday_range",
            AnomalyKind::ReverseSplit => "reverse_split",
            AnomalyKind::VolumeAnomaly => "volume_anomaly",
            AnomalyKind::Gap => "gap",
            AnomalyKind::OffGrid => "off_grid",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quality verdict attached to a candle at ingestion time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Composite score in [0, 1]
    pub quality_score: Decimal,
    pub gap_detected: bool,
    pub volume_anomaly: bool,
    pub price_spike: bool,
    pub range_anomaly: bool,
    pub reverse_split_suspected: bool,
    pub off_grid: bool,
    /// Non-critical fields that were null in the raw record
    pub missing_fields: Vec<String>,
    /// `quality_score >= validated_threshold`
    pub validated: bool,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self {
            quality_score: Decimal::ONE,
            gap_detected: false,
            volume_anomaly: false,
            price_spike: false,
            range_anomaly: false,
            reverse_split_suspected: false,
            off_grid: false,
            missing_fields: Vec::new(),
            validated: true,
        }
    }
}

impl ValidationResult {
    pub fn set_flag(&mut self, kind: AnomalyKind, value: bool) {
        match kind {
            AnomalyKind::PriceSpike => self.price_spike = value,
            AnomalyKind::IntradayRange => self.range_anomaly = value,
            AnomalyKind::ReverseSplit => self.reverse_split_suspected = value,
            AnomalyKind::VolumeAnomaly => self.volume_anomaly = value,
            AnomalyKind::Gap => self.gap_detected = value,
            AnomalyKind::OffGrid => self.off_grid = value,
        }
    }

    pub fn has_flag(&self, kind: AnomalyKind) -> bool {
        match kind {
            AnomalyKind::PriceSpike => self.price_spike,
            AnomalyKind::IntradayRange => self.range_anomaly,
            AnomalyKind::ReverseSplit => self.reverse_split_suspected,
            AnomalyKind::VolumeAnomaly => self.volume_anomaly,
            AnomalyKind::Gap => self.gap_detected,
            AnomalyKind::OffGrid => self.off_grid,
        }
    }

    /// All flags currently set, in a fixed order
    pub fn flags(&self) -> Vec<AnomalyKind> {
        ALL_ANOMALIES
            .iter()
            .copied()
            .filter(|kind| self.has_flag(*kind))
            .collect()
    }
}

pub const ALL_ANOMALIES: [AnomalyKind; 6] = [
    AnomalyKind::PriceSpike,
    AnomalyKind::IntradayRange,
    AnomalyKind::ReverseSplit,
    AnomalyKind::VolumeAnomaly,
    AnomalyKind::Gap,
    AnomalyKind::OffGrid,
];

/// Validated OHLCV record.
///
/// Unique per (symbol, timeframe, timestamp). Built only by the quality
/// engine, so `high >= max(open, close)` and `low <= min(open, close)` hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
    pub vwap: Option<Decimal>,
    pub trade_count: Option<i64>,
    pub quality: ValidationResult,
}

impl Candle {
    /// Unique storage key
    pub fn key(&self) -> (&str, Timeframe, DateTime<Utc>) {
        (&self.symbol, self.timeframe, self.timestamp)
    }

    pub fn body_high(&self) -> Decimal {
        self.open.max(self.close)
    }

    pub fn body_low(&self) -> Decimal {
        self.open.min(self.close)
    }
}

// =================================================================
// Tracked pairs
// =================================================================

/// Backfill progress of a tracked pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl BackfillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackfillStatus::Pending => "pending",
            BackfillStatus::InProgress => "in_progress",
            BackfillStatus::Completed => "completed",
            BackfillStatus::Failed => "failed",
        }
    }

    /// Statuses picked up by a resumed run
    pub fn needs_resume(&self) -> bool {
        matches!(self, BackfillStatus::Pending | BackfillStatus::Failed)
    }
}

impl fmt::Display for BackfillStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackfillStatus {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BackfillStatus::Pending),
            "in_progress" => Ok(BackfillStatus::InProgress),
            "completed" => Ok(BackfillStatus::Completed),
            "failed" => Ok(BackfillStatus::Failed),
            _ => Err(DataError::parse("backfill status", s)),
        }
    }
}

/// Asset class of a tracked symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Equity,
    Etf,
    Crypto,
    Forex,
    Futures,
    Index,
}

impl AssetClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Equity => "equity",
            AssetClass::Etf => "etf",
            AssetClass::Crypto => "crypto",
            AssetClass::Forex => "forex",
            AssetClass::Futures => "futures",
            AssetClass::Index => "index",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetClass {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "equity" | "stock" => Ok(AssetClass::Equity),
            "etf" => Ok(AssetClass::Etf),
            "crypto" => Ok(AssetClass::Crypto),
            "forex" | "fx" => Ok(AssetClass::Forex),
            "futures" | "future" => Ok(AssetClass::Futures),
            "index" => Ok(AssetClass::Index),
            _ => Err(DataError::parse("asset class", s)),
        }
    }
}

/// A (symbol, timeframe) pair the backfill keeps up to date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedPair {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub timeframe: Timeframe,
    pub active: bool,
    pub backfill_status: BackfillStatus,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Earliest timestamp to backfill from; the default lookback applies when unset
    pub backfill_from: Option<DateTime<Utc>>,
}

impl TrackedPair {
    /// New active pair waiting for its first backfill
    pub fn new(symbol: impl Into<String>, asset_class: AssetClass, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            asset_class,
            timeframe,
            active: true,
            backfill_status: BackfillStatus::Pending,
            last_attempt_at: None,
            last_error: None,
            backfill_from: None,
        }
    }

    pub fn with_backfill_from(mut self, from: DateTime<Utc>) -> Self {
        self.backfill_from = Some(from);
        self
    }

    pub fn with_status(mut self, status: BackfillStatus) -> Self {
        self.backfill_status = status;
        self
    }
}

impl fmt::Display for TrackedPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timeframe_round_trip_through_str() {
        for tf in [Timeframe::M5, Timeframe::H1, Timeframe::D1, Timeframe::W1] {
            assert_eq!(tf.as_str().parse::<Timeframe>().unwrap(), tf);
        }
        assert_eq!("Daily".parse::<Timeframe>().unwrap(), Timeframe::D1);
        assert!("2d".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_timeframe_alignment() {
        let midnight = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
        let noon = Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap();
        let odd = Utc.with_ymd_and_hms(2024, 3, 5, 12, 7, 0).unwrap();

        assert!(Timeframe::D1.is_aligned(midnight));
        assert!(!Timeframe::D1.is_aligned(noon));
        assert!(Timeframe::H4.is_aligned(noon));
        assert!(Timeframe::M1.is_aligned(odd));
        assert!(!Timeframe::M5.is_aligned(odd));

        // 2024-03-04 is a Monday
        let monday = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();
        assert!(Timeframe::W1.is_aligned(monday));
        assert!(!Timeframe::W1.is_aligned(midnight));
    }

    #[test]
    fn test_timeframe_serde_as_string() {
        let json = serde_json::to_string(&Timeframe::D1).unwrap();
        assert_eq!(json, "\"1d\"");
        let tf: Timeframe = serde_json::from_str("\"15m\"").unwrap();
        assert_eq!(tf, Timeframe::M15);
    }

    #[test]
    fn test_validation_result_flags() {
        let mut result = ValidationResult::default();
        assert!(result.flags().is_empty());

        result.set_flag(AnomalyKind::Gap, true);
        result.set_flag(AnomalyKind::VolumeAnomaly, true);
        assert!(result.gap_detected);
        assert_eq!(
            result.flags(),
            vec![AnomalyKind::VolumeAnomaly, AnomalyKind::Gap]
        );
    }

    #[test]
    fn test_backfill_status_parse() {
        assert_eq!(
            "in_progress".parse::<BackfillStatus>().unwrap(),
            BackfillStatus::InProgress
        );
        assert!(BackfillStatus::Failed.needs_resume());
        assert!(!BackfillStatus::Completed.needs_resume());
        assert!("done".parse::<BackfillStatus>().is_err());
    }
}
