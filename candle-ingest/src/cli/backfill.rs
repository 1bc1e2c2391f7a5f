//! Backfill command - run one tick

use anyhow::Result;
use clap::Args;

use crate::backfill::TickMode;
use crate::config::Settings;
use crate::context::AppContext;
use crate::storage::ensure_schema;

/// Arguments for the backfill command
#[derive(Args)]
pub struct BackfillArgs {
    /// Only process pairs left pending or failed by earlier runs
    #[arg(long)]
    pub resume: bool,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

/// Execute the backfill command
pub async fn execute(args: BackfillArgs, settings: Settings) -> Result<()> {
    let ctx = AppContext::connect(settings)?;
    if let Some(pool) = &ctx.pool {
        ensure_schema(pool).await?;
    }

    let mode = if args.resume {
        TickMode::Resume
    } else {
        TickMode::Full
    };
    let summary = ctx.orchestrator.run_tick_with_mode(mode).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{summary}");
    for failure in &summary.per_pair_errors {
        println!(
            "  {}@{}: {}{}",
            failure.symbol,
            failure.timeframe,
            failure.error,
            if failure.retryable { " (retryable)" } else { "" }
        );
    }
    Ok(())
}
