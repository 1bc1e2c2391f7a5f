//! Tracked (symbol, timeframe) pairs and their backfill status

mod registry;

pub use registry::*;
