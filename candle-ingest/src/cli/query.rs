//! Query command - read candles through the cache

use anyhow::{ensure, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use rust_decimal::Decimal;

use crate::config::Settings;
use crate::context::AppContext;
use crate::storage::CandleQuery;
use candle_common::data::Timeframe;

/// Arguments for the query command
#[derive(Args)]
pub struct QueryArgs {
    #[arg(long, short)]
    pub symbol: String,

    /// Timeframe (1m, 5m, 15m, 30m, 1h, 4h, 1d, 1w)
    #[arg(long, short, default_value = "1d")]
    pub timeframe: Timeframe,

    /// Range start, RFC 3339 (inclusive)
    #[arg(long)]
    pub start: DateTime<Utc>,

    /// Range end, RFC 3339 (inclusive)
    #[arg(long)]
    pub end: DateTime<Utc>,

    /// Only candles whose quality score passed the validation threshold
    #[arg(long)]
    pub validated_only: bool,

    /// Minimum quality score
    #[arg(long)]
    pub min_quality: Option<Decimal>,

    /// Print candles as JSON
    #[arg(long)]
    pub json: bool,
}

/// Execute the query command
pub async fn execute(args: QueryArgs, settings: Settings) -> Result<()> {
    ensure!(args.start <= args.end, "--start must not be after --end");

    let ctx = AppContext::connect(settings)?;

    let mut query = CandleQuery::new(args.symbol, args.timeframe, args.start, args.end);
    if args.validated_only {
        query = query.validated_only();
    }
    if let Some(min) = args.min_quality {
        query = query.with_min_quality(min);
    }

    let candles = ctx.queries.query(&query).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(candles.as_slice())?);
        return Ok(());
    }

    println!(
        "{:<25} {:>12} {:>12} {:>12} {:>12} {:>12} {:>7} flags",
        "timestamp", "open", "high", "low", "close", "volume", "score"
    );
    for c in candles.iter() {
        let flags: Vec<_> = c.quality.flags().iter().map(|f| f.as_str()).collect();
        println!(
            "{:<25} {:>12} {:>12} {:>12} {:>12} {:>12} {:>7} {}",
            c.timestamp.to_rfc3339(),
            c.open,
            c.high,
            c.low,
            c.close,
            c.volume,
            c.quality.quality_score.round_dp(2),
            flags.join(",")
        );
    }
    println!("{} candles", candles.len());
    Ok(())
}
