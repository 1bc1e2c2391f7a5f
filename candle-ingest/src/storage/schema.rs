//! Table definitions for candles and tracked pairs

use tracing::info;

use super::pool::PgPoolManager;
use candle_common::error::DatabaseError;

const CREATE_CANDLES: &str = r#"
    CREATE TABLE IF NOT EXISTS candles (
        symbol VARCHAR(32) NOT NULL,
        timeframe VARCHAR(8) NOT NULL,
        ts TIMESTAMPTZ NOT NULL,
        open NUMERIC(20, 8) NOT NULL,
        high NUMERIC(20, 8) NOT NULL,
        low NUMERIC(20, 8) NOT NULL,
        close NUMERIC(20, 8) NOT NULL,
        volume BIGINT NOT NULL,
        vwap NUMERIC(20, 8),
        trade_count BIGINT,
        quality_score NUMERIC(6, 4) NOT NULL,
        gap_detected BOOLEAN NOT NULL DEFAULT FALSE,
        volume_anomaly BOOLEAN NOT NULL DEFAULT FALSE,
        price_spike BOOLEAN NOT NULL DEFAULT FALSE,
        range_anomaly BOOLEAN NOT NULL DEFAULT FALSE,
        reverse_split_suspected BOOLEAN NOT NULL DEFAULT FALSE,
        off_grid BOOLEAN NOT NULL DEFAULT FALSE,
        missing_fields TEXT[] NOT NULL DEFAULT '{}',
        validated BOOLEAN NOT NULL,
        ingested_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (symbol, timeframe, ts)
    )
"#;

const CREATE_CANDLES_VALIDATED_INDEX: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_candles_validated
    ON candles (symbol, timeframe, ts)
    WHERE validated
"#;

const CREATE_TRACKED_PAIRS: &str = r#"
    CREATE TABLE IF NOT EXISTS tracked_pairs (
        symbol VARCHAR(32) NOT NULL,
        asset_class VARCHAR(16) NOT NULL,
        timeframe VARCHAR(8) NOT NULL,
        active BOOLEAN NOT NULL DEFAULT TRUE,
        backfill_status VARCHAR(16) NOT NULL DEFAULT 'pending',
        last_attempt_at TIMESTAMPTZ,
        last_error TEXT,
        backfill_from TIMESTAMPTZ,
        PRIMARY KEY (symbol, timeframe)
    )
"#;

/// Create the candle and tracked-pair tables if they do not exist
pub async fn ensure_schema(pool: &PgPoolManager) -> Result<(), DatabaseError> {
    let mut conn = pool.acquire().await?;

    for statement in [
        CREATE_CANDLES,
        CREATE_CANDLES_VALIDATED_INDEX,
        CREATE_TRACKED_PAIRS,
    ] {
        sqlx::query(statement).execute(&mut *conn).await?;
    }

    info!("Database schema ready");
    Ok(())
}
