//! # Candle Ingest
//!
//! Backfills OHLCV candles from an upstream provider, validates and scores
//! them, persists them idempotently and serves range queries through a cache.
//!
//! ## Write path
//!
//! A [`scheduler::TickScheduler`] fires the [`backfill::BackfillOrchestrator`].
//! Each tick fetches every tracked pair through a
//! [`resilience::RetryableOperation`] guarded by a sliding-window rate limiter
//! and a circuit breaker, runs the batch through the quality engine from
//! `candle-common`, and inserts the result through a [`storage::CandleStore`].
//!
//! ## Read path
//!
//! [`storage::CandleQueryService`] answers range queries from a TTL and
//! size bounded cache and falls through to the store on a miss.

pub mod backfill;
pub mod cli;
pub mod config;
pub mod context;
pub mod provider;
pub mod resilience;
pub mod scheduler;
pub mod storage;
pub mod symbol;

// Re-export commonly used types
pub use backfill::{BackfillError, BackfillOrchestrator, TickMode, TickSummary};
pub use config::Settings;
pub use context::AppContext;
pub use provider::{CandleFetcher, FetchError, FetchResult};
pub use resilience::{CircuitBreaker, RetryableOperation, SlidingWindowRateLimiter};
pub use storage::{CandleQuery, CandleQueryService, CandleStore, StorageError};
pub use symbol::{RegistryError, SymbolRegistry};
