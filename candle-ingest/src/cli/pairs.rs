//! Tracked pair commands

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use tracing::info;

use crate::config::Settings;
use crate::context::AppContext;
use crate::storage::ensure_schema;
use crate::symbol::PostgresSymbolRegistry;
use candle_common::data::{AssetClass, Timeframe, TrackedPair};

/// Tracked pair subcommands
#[derive(Subcommand)]
pub enum PairsCommands {
    /// Track a (symbol, timeframe) pair
    Add(AddArgs),
    /// List active pairs with their backfill status
    List,
}

/// Arguments for the add command
#[derive(Args)]
pub struct AddArgs {
    #[arg(long, short)]
    pub symbol: String,

    /// equity, etf, crypto, forex, futures or index
    #[arg(long, default_value = "equity")]
    pub asset_class: AssetClass,

    #[arg(long, short, default_value = "1d")]
    pub timeframe: Timeframe,

    /// Backfill start, RFC 3339; defaults to the configured lookback
    #[arg(long)]
    pub from: Option<DateTime<Utc>>,
}

/// Execute a pairs subcommand
pub async fn execute(cmd: PairsCommands, settings: Settings) -> Result<()> {
    let ctx = AppContext::connect(settings)?;
    let pool = ctx.pool.as_ref().context("pair management needs a database")?;
    ensure_schema(pool).await?;

    match cmd {
        PairsCommands::Add(args) => {
            let mut pair = TrackedPair::new(args.symbol, args.asset_class, args.timeframe);
            if let Some(from) = args.from {
                pair = pair.with_backfill_from(from);
            }
            PostgresSymbolRegistry::new(pool.clone()).register(&pair).await?;
            info!(%pair, "Tracking pair");
            println!("Tracking {pair}");
        }
        PairsCommands::List => {
            let pairs = ctx.registry.list_active_pairs().await?;
            for pair in &pairs {
                println!(
                    "{:<20} {:<8} {:<12} {}",
                    pair.to_string(),
                    pair.asset_class.as_str(),
                    pair.backfill_status.as_str(),
                    pair.last_error.as_deref().unwrap_or("")
                );
            }
            println!("{} active pairs", pairs.len());
        }
    }
    Ok(())
}
