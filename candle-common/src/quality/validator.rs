// validator.rs - Structural checks that turn a raw record into a candle

use rust_decimal::Decimal;
use thiserror::Error;

use crate::data::{Candle, RawCandle, Timeframe, ValidationResult};
use crate::error::{ErrorCategory, ErrorClassification};

/// Structural violations. The offending candle is dropped, the batch continues.
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Price must be positive: {field} = {value}")]
    PriceNotPositive { field: &'static str, value: Decimal },

    #[error("Volume must be non-negative: {0}")]
    NegativeVolume(i64),

    #[error("High {high} is below max(open, close) {body_high}")]
    HighBelowBody { high: Decimal, body_high: Decimal },

    #[error("Low {low} is above min(open, close) {body_low}")]
    LowAboveBody { low: Decimal, body_low: Decimal },
}

impl ErrorClassification for ValidationError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Permanent
    }
}

pub type ValidationOutcome<T> = Result<T, ValidationError>;

fn required<T: Copy>(value: Option<T>, field: &'static str) -> ValidationOutcome<T> {
    value.ok_or(ValidationError::MissingField(field))
}

fn validate_price(value: Decimal, field: &'static str) -> ValidationOutcome<Decimal> {
    if value <= Decimal::ZERO {
        return Err(ValidationError::PriceNotPositive { field, value });
    }
    Ok(value)
}

/// Run the structural checks on one raw record.
///
/// On success the returned candle carries a default (clean) validation
/// result; anomaly flags and the score are filled in by the engine.
pub fn validate_structure(raw: &RawCandle, timeframe: Timeframe) -> ValidationOutcome<Candle> {
    let open = validate_price(required(raw.open, "open")?, "open")?;
    let high = validate_price(required(raw.high, "high")?, "high")?;
    let low = validate_price(required(raw.low, "low")?, "low")?;
    let close = validate_price(required(raw.close, "close")?, "close")?;
    let volume = required(raw.volume, "volume")?;

    if volume < 0 {
        return Err(ValidationError::NegativeVolume(volume));
    }

    let body_high = open.max(close);
    if high < body_high {
        return Err(ValidationError::HighBelowBody { high, body_high });
    }

    let body_low = open.min(close);
    if low > body_low {
        return Err(ValidationError::LowAboveBody { low, body_low });
    }

    Ok(Candle {
        symbol: raw.symbol.clone(),
        timeframe,
        timestamp: raw.timestamp,
        open,
        high,
        low,
        close,
        volume,
        vwap: raw.vwap,
        trade_count: raw.trade_count,
        quality: ValidationResult::default(),
    })
}

/// Names of null non-critical fields, in a fixed order
pub fn missing_optional_fields(candle: &Candle) -> Vec<String> {
    let mut missing = Vec::new();
    if candle.vwap.is_none() {
        missing.push("vwap".to_string());
    }
    if candle.trade_count.is_none() {
        missing.push("trade_count".to_string());
    }
    missing
}
