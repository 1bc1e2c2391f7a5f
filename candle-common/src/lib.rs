//! # Candle Common
//!
//! Shared building blocks for the candle ingestion services.
//!
//! ## Modules
//!
//! - [`data`]: candle, timeframe and tracked-pair types plus the read-path query cache
//! - [`quality`]: structural validation, anomaly detection and quality scoring
//! - [`error`]: shared error types and the [`error::ErrorClassification`] trait
//! - [`logging`]: tracing subscriber setup

pub mod data;
pub mod error;
pub mod logging;
pub mod quality;

pub use data::{
    AnomalyKind, AssetClass, BackfillStatus, Candle, RawCandle, Timeframe, TrackedPair,
    ValidationResult,
};
