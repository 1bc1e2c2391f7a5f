//! Persistence gateway for validated candles
//!
//! Inserts are idempotent on (symbol, timeframe, timestamp): a conflicting
//! row is skipped, never overwritten. A batch is committed as a whole or not
//! at all.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{Connection, Row};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::pool::PgPoolManager;
use candle_common::data::{Candle, Timeframe, ValidationResult};
use candle_common::error::{DatabaseError, ErrorCategory, ErrorClassification};

/// Storage errors
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Stored row could not be decoded: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Database(err.into())
    }
}

impl ErrorClassification for StorageError {
    fn category(&self) -> ErrorCategory {
        match self {
            StorageError::Database(e) => e.category(),
            StorageError::InvalidBatch(_) => ErrorCategory::Permanent,
            StorageError::Serialization(_) => ErrorCategory::Internal,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            StorageError::Database(e) => e.suggested_retry_delay(),
            _ => None,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Rows written and rows skipped on key conflict
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: usize,
    pub skipped: usize,
}

/// Range query over one (symbol, timeframe); `start` and `end` are inclusive
#[derive(Debug, Clone, PartialEq)]
pub struct CandleQuery {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub validated_only: bool,
    pub min_quality: Option<Decimal>,
}

impl CandleQuery {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            start,
            end,
            validated_only: false,
            min_quality: None,
        }
    }

    pub fn validated_only(mut self) -> Self {
        self.validated_only = true;
        self
    }

    pub fn with_min_quality(mut self, min_quality: Decimal) -> Self {
        self.min_quality = Some(min_quality);
        self
    }

    /// Cache key rendering every parameter.
    ///
    /// The symbol is debug-quoted so separators inside it cannot make two
    /// queries collide; `min_quality` is normalized so `0.9` and `0.90` share
    /// a key.
    pub fn cache_key(&self) -> String {
        let min_quality = self
            .min_quality
            .map(|q| q.normalize().to_string())
            .unwrap_or_else(|| "-".to_string());

        format!(
            "candles:{:?}:{}:{}:{}:validated={}:min_quality={}",
            self.symbol,
            self.timeframe,
            self.start.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            self.end.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            self.validated_only,
            min_quality,
        )
    }

    pub fn matches(&self, candle: &Candle) -> bool {
        candle.symbol == self.symbol
            && candle.timeframe == self.timeframe
            && candle.timestamp >= self.start
            && candle.timestamp <= self.end
            && (!self.validated_only || candle.quality.validated)
            && self
                .min_quality
                .map_or(true, |min| candle.quality.quality_score >= min)
    }
}

/// Candle persistence
#[async_trait]
pub trait CandleStore: Send + Sync {
    /// Insert a batch; rows whose key already exists are skipped
    async fn insert_batch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> StorageResult<InsertOutcome>;

    /// Candles matching `query`, ordered by timestamp
    async fn query_range(&self, query: &CandleQuery) -> StorageResult<Vec<Candle>>;
}

fn check_batch(symbol: &str, timeframe: Timeframe, candles: &[Candle]) -> StorageResult<()> {
    match candles
        .iter()
        .find(|c| c.symbol != symbol || c.timeframe != timeframe)
    {
        Some(c) => Err(StorageError::InvalidBatch(format!(
            "{}@{} in batch for {}@{}",
            c.symbol, c.timeframe, symbol, timeframe
        ))),
        None => Ok(()),
    }
}

type CandleKey = (String, Timeframe, DateTime<Utc>);

/// Ordered in-memory store
#[derive(Debug, Default)]
pub struct InMemoryCandleStore {
    rows: Mutex<BTreeMap<CandleKey, Candle>>,
    failures_pending: AtomicU32,
}

impl InMemoryCandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` inserts fail with a connection error
    pub fn fail_next_inserts(&self, n: u32) {
        self.failures_pending.store(n, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    /// Every stored candle of one pair, ordered by timestamp
    pub fn candles(&self, symbol: &str, timeframe: Timeframe) -> Vec<Candle> {
        self.rows
            .lock()
            .values()
            .filter(|c| c.symbol == symbol && c.timeframe == timeframe)
            .cloned()
            .collect()
    }

    fn take_injected_failure(&self) -> bool {
        self.failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl CandleStore for InMemoryCandleStore {
    async fn insert_batch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> StorageResult<InsertOutcome> {
        if self.take_injected_failure() {
            return Err(DatabaseError::Connection("injected failure".to_string()).into());
        }
        check_batch(symbol, timeframe, candles)?;

        let mut rows = self.rows.lock();
        let mut outcome = InsertOutcome::default();
        for candle in candles {
            let key = (candle.symbol.clone(), candle.timeframe, candle.timestamp);
            if rows.contains_key(&key) {
                outcome.skipped += 1;
            } else {
                rows.insert(key, candle.clone());
                outcome.inserted += 1;
            }
        }
        Ok(outcome)
    }

    async fn query_range(&self, query: &CandleQuery) -> StorageResult<Vec<Candle>> {
        if query.start > query.end {
            return Ok(Vec::new());
        }
        let lower = (query.symbol.clone(), query.timeframe, query.start);
        let upper = (query.symbol.clone(), query.timeframe, query.end);

        Ok(self
            .rows
            .lock()
            .range(lower..=upper)
            .map(|(_, c)| c)
            .filter(|c| query.matches(c))
            .cloned()
            .collect())
    }
}

/// PostgreSQL store using the `candles` table
#[derive(Debug, Clone)]
pub struct PostgresCandleStore {
    pool: PgPoolManager,
}

impl PostgresCandleStore {
    pub fn new(pool: PgPoolManager) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPoolManager {
        &self.pool
    }
}

const INSERT_COLUMNS: &str = r#"
    INSERT INTO candles (
        symbol, timeframe, ts, open, high, low, close, volume, vwap, trade_count,
        quality_score, gap_detected, volume_anomaly, price_spike, range_anomaly,
        reverse_split_suspected, off_grid, missing_fields, validated
    )
    VALUES "#;

/// Bind parameters per candle row
const COLUMNS_PER_ROW: usize = 19;
/// Rows per INSERT statement, well under the 65535 bind parameter limit
const INSERT_CHUNK_ROWS: usize = 1000;

/// Multi-row insert for `rows` candles, skipping rows already stored
fn insert_statement(rows: usize) -> String {
    let mut sql = String::from(INSERT_COLUMNS);
    for row in 0..rows {
        if row > 0 {
            sql.push_str(", ");
        }
        let first = row * COLUMNS_PER_ROW + 1;
        let placeholders: Vec<String> = (first..first + COLUMNS_PER_ROW)
            .map(|n| format!("${n}"))
            .collect();
        sql.push('(');
        sql.push_str(&placeholders.join(", "));
        sql.push(')');
    }
    sql.push_str(" ON CONFLICT (symbol, timeframe, ts) DO NOTHING");
    sql
}

const SELECT_RANGE: &str = r#"
    SELECT symbol, timeframe, ts, open, high, low, close, volume, vwap, trade_count,
           quality_score, gap_detected, volume_anomaly, price_spike, range_anomaly,
           reverse_split_suspected, off_grid, missing_fields, validated
    FROM candles
    WHERE symbol = $1 AND timeframe = $2 AND ts >= $3 AND ts <= $4
      AND ($5 = FALSE OR validated)
      AND ($6::NUMERIC IS NULL OR quality_score >= $6)
    ORDER BY ts
"#;

fn candle_from_row(row: &PgRow) -> StorageResult<Candle> {
    let timeframe: String = row.try_get("timeframe")?;
    let timeframe = timeframe
        .parse::<Timeframe>()
        .map_err(|e| StorageError::Serialization(e.to_string()))?;

    Ok(Candle {
        symbol: row.try_get("symbol")?,
        timeframe,
        timestamp: row.try_get("ts")?,
        open: row.try_get("open")?,
        high: row.try_get("high")?,
        low: row.try_get("low")?,
        close: row.try_get("close")?,
        volume: row.try_get("volume")?,
        vwap: row.try_get("vwap")?,
        trade_count: row.try_get("trade_count")?,
        quality: ValidationResult {
            quality_score: row.try_get("quality_score")?,
            gap_detected: row.try_get("gap_detected")?,
            volume_anomaly: row.try_get("volume_anomaly")?,
            price_spike: row.try_get("price_spike")?,
            range_anomaly: row.try_get("range_anomaly")?,
            reverse_split_suspected: row.try_get("reverse_split_suspected")?,
            off_grid: row.try_get("off_grid")?,
            missing_fields: row.try_get("missing_fields")?,
            validated: row.try_get("validated")?,
        },
    })
}

#[async_trait]
impl CandleStore for PostgresCandleStore {
    async fn insert_batch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> StorageResult<InsertOutcome> {
        check_batch(symbol, timeframe, candles)?;
        if candles.is_empty() {
            return Ok(InsertOutcome::default());
        }

        let mut conn = self.pool.acquire().await?;
        let mut tx = conn
            .begin()
            .await
            .map_err(|e| DatabaseError::Transaction(e.to_string()))?;

        let mut inserted = 0usize;
        for chunk in candles.chunks(INSERT_CHUNK_ROWS) {
            let sql = insert_statement(chunk.len());
            let mut query = sqlx::query(&sql);
            for c in chunk {
                let q = &c.quality;
                query = query
                    .bind(&c.symbol)
                    .bind(c.timeframe.as_str())
                    .bind(c.timestamp)
                    .bind(c.open)
                    .bind(c.high)
                    .bind(c.low)
                    .bind(c.close)
                    .bind(c.volume)
                    .bind(c.vwap)
                    .bind(c.trade_count)
                    .bind(q.quality_score)
                    .bind(q.gap_detected)
                    .bind(q.volume_anomaly)
                    .bind(q.price_spike)
                    .bind(q.range_anomaly)
                    .bind(q.reverse_split_suspected)
                    .bind(q.off_grid)
                    .bind(&q.missing_fields)
                    .bind(q.validated);
            }
            let result = query.execute(&mut *tx).await?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Transaction(e.to_string()))?;

        let outcome = InsertOutcome {
            inserted,
            skipped: candles.len() - inserted,
        };
        debug!(symbol, %timeframe, inserted, skipped = outcome.skipped, "Inserted candle batch");
        Ok(outcome)
    }

    async fn query_range(&self, query: &CandleQuery) -> StorageResult<Vec<Candle>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(SELECT_RANGE)
            .bind(&query.symbol)
            .bind(query.timeframe.as_str())
            .bind(query.start)
            .bind(query.end)
            .bind(query.validated_only)
            .bind(query.min_quality)
            .fetch_all(&mut *conn)
            .await?;

        rows.iter().map(candle_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use rust_decimal_macros::dec;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap()
    }

    fn candle(symbol: &str, day: u32, score: Decimal) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            timeframe: Timeframe::D1,
            timestamp: ts(day),
            open: dec!(10),
            high: dec!(11),
            low: dec!(9),
            close: dec!(10.5),
            volume: 1_000,
            vwap: None,
            trade_count: None,
            quality: ValidationResult {
                quality_score: score,
                validated: score >= dec!(0.85),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let store = InMemoryCandleStore::new();
        let batch = vec![candle("ABC", 4, dec!(1)), candle("ABC", 5, dec!(1))];

        let first = store.insert_batch("ABC", Timeframe::D1, &batch).await.unwrap();
        assert_eq!(first, InsertOutcome { inserted: 2, skipped: 0 });

        let again = store.insert_batch("ABC", Timeframe::D1, &batch[..1]).await.unwrap();
        assert_eq!(again, InsertOutcome { inserted: 0, skipped: 1 });
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_mismatched_batch_rejected_whole() {
        let store = InMemoryCandleStore::new();
        let batch = vec![candle("ABC", 4, dec!(1)), candle("XYZ", 5, dec!(1))];

        let err = store.insert_batch("ABC", Timeframe::D1, &batch).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidBatch(_)));
        assert!(err.is_permanent());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_injected_failures_are_transient() {
        let store = InMemoryCandleStore::new();
        store.fail_next_inserts(1);
        let batch = vec![candle("ABC", 4, dec!(1))];

        let err = store.insert_batch("ABC", Timeframe::D1, &batch).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.insert_batch("ABC", Timeframe::D1, &batch).await.is_ok());
    }

    #[tokio::test]
    async fn test_query_range_filters() {
        let store = InMemoryCandleStore::new();
        let batch = vec![
            candle("ABC", 4, dec!(1)),
            candle("ABC", 5, dec!(0.7)),
            candle("ABC", 6, dec!(0.9)),
            candle("ABC", 7, dec!(1)),
        ];
        store.insert_batch("ABC", Timeframe::D1, &batch).await.unwrap();
        store
            .insert_batch("ABD", Timeframe::D1, &[candle("ABD", 5, dec!(1))])
            .await
            .unwrap();

        let all = store
            .query_range(&CandleQuery::new("ABC", Timeframe::D1, ts(4), ts(6)))
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let validated = store
            .query_range(&CandleQuery::new("ABC", Timeframe::D1, ts(1), ts(30)).validated_only())
            .await
            .unwrap();
        assert_eq!(validated.len(), 3);

        let high_quality = store
            .query_range(
                &CandleQuery::new("ABC", Timeframe::D1, ts(1), ts(30)).with_min_quality(dec!(0.95)),
            )
            .await
            .unwrap();
        let days: Vec<_> = high_quality.iter().map(|c| c.timestamp).collect();
        assert_eq!(days, vec![ts(4), ts(7)]);
    }

    #[test]
    fn test_cache_key_covers_every_parameter() {
        let base = CandleQuery::new("ABC", Timeframe::D1, ts(1), ts(10));
        let variants = [
            base.clone(),
            CandleQuery { symbol: "ABD".into(), ..base.clone() },
            CandleQuery { timeframe: Timeframe::H1, ..base.clone() },
            CandleQuery { start: ts(2), ..base.clone() },
            CandleQuery { end: ts(10) + ChronoDuration::seconds(1), ..base.clone() },
            base.clone().validated_only(),
            base.clone().with_min_quality(dec!(0.9)),
        ];

        let keys: std::collections::HashSet<_> = variants.iter().map(|q| q.cache_key()).collect();
        assert_eq!(keys.len(), variants.len());

        assert_eq!(base.cache_key(), base.clone().cache_key());
        assert_eq!(
            base.clone().with_min_quality(dec!(0.9)).cache_key(),
            base.clone().with_min_quality(dec!(0.90)).cache_key()
        );
    }

    #[test]
    fn test_insert_statement_numbers_placeholders_per_row() {
        let sql = insert_statement(2);

        assert!(sql.contains("($1, $2, $3,"));
        assert!(sql.contains("$19), ($20, $21,"));
        assert!(sql.contains("$38)"));
        assert!(!sql.contains("$39"));
        assert!(sql.trim_end().ends_with("ON CONFLICT (symbol, timeframe, ts) DO NOTHING"));
        assert!(INSERT_CHUNK_ROWS * COLUMNS_PER_ROW <= u16::MAX as usize);
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL at DATABASE_URL"]
    async fn test_postgres_chunked_insert_counts_skips() {
        use crate::storage::{ensure_schema, PoolConfig};

        let url = std::env::var("DATABASE_URL").unwrap();
        let pool = PgPoolManager::new(&url, PoolConfig::default()).unwrap();
        ensure_schema(&pool).await.unwrap();
        let store = PostgresCandleStore::new(pool);

        // Spans two INSERT statements
        let symbol = format!("T{}", Utc::now().timestamp_micros());
        let start = ts(1);
        let batch: Vec<Candle> = (0..INSERT_CHUNK_ROWS as i64 + 5)
            .map(|i| Candle {
                symbol: symbol.clone(),
                timestamp: start + ChronoDuration::minutes(i),
                timeframe: Timeframe::M1,
                ..candle(&symbol, 1, dec!(1))
            })
            .collect();

        let first = store.insert_batch(&symbol, Timeframe::M1, &batch).await.unwrap();
        assert_eq!(first.inserted, batch.len());
        assert_eq!(first.skipped, 0);

        let again = store.insert_batch(&symbol, Timeframe::M1, &batch).await.unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(again.skipped, batch.len());
    }
}
