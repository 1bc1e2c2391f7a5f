//! Database management commands

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;

use crate::config::Settings;
use crate::context::AppContext;
use crate::storage::{ensure_schema, PoolRecommendation};

/// Database subcommands
#[derive(Subcommand)]
pub enum DbCommands {
    /// Create the candle and tracked-pair tables
    Init,
    /// Probe the database and print connection pool statistics
    PoolStats,
}

/// Execute a database subcommand
pub async fn execute(cmd: DbCommands, settings: Settings) -> Result<()> {
    let ctx = AppContext::connect(settings)?;
    let pool = ctx.pool.as_ref().context("no database configured")?;

    match cmd {
        DbCommands::Init => {
            ensure_schema(pool).await?;
            info!("Schema initialized");
            println!("Schema initialized");
        }
        DbCommands::PoolStats => {
            let health = pool.check_health().await;
            let stats = pool.stats();

            println!("Health:            {:?}", health);
            println!("Pool size:         {} (+{} overflow)", stats.pool_size, stats.max_overflow);
            println!("Checked out:       {} (peak {})", stats.checked_out, stats.peak_checked_out);
            println!("Open:              {} ({} idle)", stats.open, stats.idle);
            println!("Checkouts:         {}", stats.checkouts);
            println!("Checkins:          {}", stats.checkins);
            println!("Connects:          {}", stats.connects);
            println!("Overflow events:   {}", stats.overflow_events);
            println!("Invalidations:     {}", stats.invalidations);
            println!("Recycled:          {}", stats.recycled);
            println!("Acquire timeouts:  {}", stats.timeouts);
            println!("Overflow rate:     {:.1}%", stats.overflow_rate() * 100.0);
            match stats.recommendation() {
                PoolRecommendation::Keep => println!("Recommendation:    keep current size"),
                PoolRecommendation::Grow { suggested } => {
                    println!("Recommendation:    grow pool_size to {suggested}")
                }
                PoolRecommendation::Shrink { suggested } => {
                    println!("Recommendation:    shrink pool_size to {suggested}")
                }
            }
        }
    }
    Ok(())
}
