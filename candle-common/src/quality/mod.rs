//! Data-quality engine for raw candle batches.
//!
//! Processing a batch runs three layers in order:
//!
//! 1. **Structural checks** per record: required fields present, positive
//!    prices, non-negative volume, high/low enclosing open and close. Failing
//!    records are dropped and reported.
//! 2. **Batch consistency**: a batch mixing symbols is rejected; records are
//!    put in timestamp order and later duplicates dropped.
//! 3. **Anomaly detectors**: a fixed list of pure checks (see [`CHECKS`]) sets
//!    flags on each candle, and each flag subtracts a penalty from the score.
//!
//! ## Usage
//!
//! ```ignore
//! use candle_common::quality::{QualityConfig, QualityEngine};
//!
//! let engine = QualityEngine::new(QualityConfig::default());
//! let report = engine.process("ABC", Timeframe::D1, &raw)?;
//! for candle in &report.candles {
//!     println!("{} {}", candle.timestamp, candle.quality.quality_score);
//! }
//! ```

mod config;
mod detectors;
mod engine;
mod gap_detection;
mod validator;


pub use config::QualityConfig;
pub use detectors::{detect, median_nonzero_volume, Check, CheckContext, CHECKS};
pub use engine::{quality_score, QualityEngine, QualityError, QualityReport, RejectedCandle};
pub use gap_detection::{business_days_between, is_unexpected_gap};
pub use validator::{missing_optional_fields, validate_structure, ValidationError};
