//! Candle data model and read-path cache.

pub mod cache;
pub mod types;

pub use cache::{CacheConfig, CacheStats, QueryCache};
pub use types::{
    AnomalyKind, AssetClass, BackfillStatus, Candle, DataError, RawCandle, Timeframe,
    TrackedPair, ValidationResult, ALL_ANOMALIES,
};
