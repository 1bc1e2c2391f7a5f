//! Tracked-pair registry
//!
//! The backfill reads active pairs from the registry at every tick and
//! writes the outcome of each attempt back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::debug;

use crate::storage::PgPoolManager;
use candle_common::data::{AssetClass, BackfillStatus, Timeframe, TrackedPair};
use candle_common::error::{DatabaseError, ErrorCategory, ErrorClassification};

/// Registry errors
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Unknown tracked pair {symbol}@{timeframe}")]
    UnknownPair { symbol: String, timeframe: Timeframe },

    #[error("Corrupt registry row: {0}")]
    Corrupt(String),

    #[error("Registry unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for RegistryError {
    fn from(err: sqlx::Error) -> Self {
        RegistryError::Database(err.into())
    }
}

impl ErrorClassification for RegistryError {
    fn category(&self) -> ErrorCategory {
        match self {
            RegistryError::Database(e) => e.category(),
            RegistryError::UnknownPair { .. } => ErrorCategory::Permanent,
            RegistryError::Corrupt(_) => ErrorCategory::Internal,
            RegistryError::Unavailable(_) => ErrorCategory::Transient,
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Source of tracked pairs and sink for their backfill status
#[async_trait]
pub trait SymbolRegistry: Send + Sync {
    /// Every active pair, ordered by (symbol, timeframe)
    async fn list_active_pairs(&self) -> RegistryResult<Vec<TrackedPair>>;

    /// Record a status transition; `error` replaces the stored last error
    async fn update_status(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        status: BackfillStatus,
        error: Option<&str>,
    ) -> RegistryResult<()>;
}

/// Apply a status transition to a pair; reverting to pending keeps the
/// last attempt timestamp
fn apply_status(
    pair: &mut TrackedPair,
    status: BackfillStatus,
    error: Option<&str>,
    now: DateTime<Utc>,
) {
    pair.backfill_status = status;
    pair.last_error = error.map(str::to_string);
    if status != BackfillStatus::Pending {
        pair.last_attempt_at = Some(now);
    }
}

/// In-memory registry for tests and local runs
#[derive(Debug, Default)]
pub struct InMemorySymbolRegistry {
    pairs: Mutex<BTreeMap<(String, Timeframe), TrackedPair>>,
    unavailable: AtomicBool,
    fail_updates: AtomicBool,
}

impl InMemorySymbolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pairs(pairs: impl IntoIterator<Item = TrackedPair>) -> Self {
        let registry = Self::new();
        for pair in pairs {
            registry.upsert(pair);
        }
        registry
    }

    pub fn upsert(&self, pair: TrackedPair) {
        self.pairs
            .lock()
            .insert((pair.symbol.clone(), pair.timeframe), pair);
    }

    pub fn get(&self, symbol: &str, timeframe: Timeframe) -> Option<TrackedPair> {
        self.pairs
            .lock()
            .get(&(symbol.to_string(), timeframe))
            .cloned()
    }

    pub fn status(&self, symbol: &str, timeframe: Timeframe) -> Option<BackfillStatus> {
        self.get(symbol, timeframe).map(|p| p.backfill_status)
    }

    /// Make listing fail, simulating an unreachable registry
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make status writes fail
    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SymbolRegistry for InMemorySymbolRegistry {
    async fn list_active_pairs(&self) -> RegistryResult<Vec<TrackedPair>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable("registry offline".to_string()));
        }
        Ok(self
            .pairs
            .lock()
            .values()
            .filter(|p| p.active)
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        status: BackfillStatus,
        error: Option<&str>,
    ) -> RegistryResult<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable("status write rejected".to_string()));
        }
        let mut pairs = self.pairs.lock();
        let pair = pairs
            .get_mut(&(symbol.to_string(), timeframe))
            .ok_or_else(|| RegistryError::UnknownPair {
                symbol: symbol.to_string(),
                timeframe,
            })?;
        apply_status(pair, status, error, Utc::now());
        Ok(())
    }
}

/// Registry backed by the `tracked_pairs` table
#[derive(Debug, Clone)]
pub struct PostgresSymbolRegistry {
    pool: PgPoolManager,
}

impl PostgresSymbolRegistry {
    pub fn new(pool: PgPoolManager) -> Self {
        Self { pool }
    }

    /// Insert a pair or update its asset class, active flag and backfill start
    pub async fn register(&self, pair: &TrackedPair) -> RegistryResult<()> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query(
            r#"
            INSERT INTO tracked_pairs (symbol, asset_class, timeframe, active, backfill_status, backfill_from)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (symbol, timeframe) DO UPDATE
            SET asset_class = $2, active = $4, backfill_from = $6
            "#,
        )
        .bind(&pair.symbol)
        .bind(pair.asset_class.as_str())
        .bind(pair.timeframe.as_str())
        .bind(pair.active)
        .bind(pair.backfill_status.as_str())
        .bind(pair.backfill_from)
        .execute(&mut *conn)
        .await?;

        debug!(%pair, "Registered tracked pair");
        Ok(())
    }
}

fn pair_from_row(row: &PgRow) -> RegistryResult<TrackedPair> {
    let corrupt = |e: candle_common::data::DataError| RegistryError::Corrupt(e.to_string());

    let asset_class: String = row.try_get("asset_class")?;
    let timeframe: String = row.try_get("timeframe")?;
    let status: String = row.try_get("backfill_status")?;

    Ok(TrackedPair {
        symbol: row.try_get("symbol")?,
        asset_class: asset_class.parse::<AssetClass>().map_err(corrupt)?,
        timeframe: timeframe.parse::<Timeframe>().map_err(corrupt)?,
        active: row.try_get("active")?,
        backfill_status: status.parse::<BackfillStatus>().map_err(corrupt)?,
        last_attempt_at: row.try_get("last_attempt_at")?,
        last_error: row.try_get("last_error")?,
        backfill_from: row.try_get("backfill_from")?,
    })
}

#[async_trait]
impl SymbolRegistry for PostgresSymbolRegistry {
    async fn list_active_pairs(&self) -> RegistryResult<Vec<TrackedPair>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(
            r#"
            SELECT symbol, asset_class, timeframe, active, backfill_status,
                   last_attempt_at, last_error, backfill_from
            FROM tracked_pairs
            WHERE active
            ORDER BY symbol, timeframe
            "#,
        )
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(pair_from_row).collect()
    }

    async fn update_status(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        status: BackfillStatus,
        error: Option<&str>,
    ) -> RegistryResult<()> {
        let mut conn = self.pool.acquire().await?;
        let result = sqlx::query(
            r#"
            UPDATE tracked_pairs
            SET backfill_status = $3,
                last_error = $4,
                last_attempt_at = CASE WHEN $3 = 'pending' THEN last_attempt_at ELSE NOW() END
            WHERE symbol = $1 AND timeframe = $2
            "#,
        )
        .bind(symbol)
        .bind(timeframe.as_str())
        .bind(status.as_str())
        .bind(error)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::UnknownPair {
                symbol: symbol.to_string(),
                timeframe,
            });
        }
        Ok(())
    }
}
