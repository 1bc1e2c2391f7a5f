//! Serve command - run scheduled backfill ticks

use anyhow::Result;
use clap::Args;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::Settings;
use crate::context::AppContext;
use crate::storage::ensure_schema;

/// Arguments for the serve command
#[derive(Args)]
pub struct ServeArgs {
    /// Only process pending and failed pairs on every tick
    #[arg(long)]
    pub resume: bool,

    /// Override the tick interval in seconds
    #[arg(long)]
    pub interval_secs: Option<u64>,
}

/// Execute the serve command
pub async fn execute(args: ServeArgs, mut settings: Settings) -> Result<()> {
    if args.resume {
        settings.backfill.resume = true;
    }
    if let Some(secs) = args.interval_secs {
        settings.backfill.tick_interval_secs = secs;
    }

    let ctx = AppContext::connect(settings)?;
    if let Some(pool) = &ctx.pool {
        ensure_schema(pool).await?;
    }

    info!(
        interval_secs = ctx.settings.backfill.tick_interval_secs,
        resume = ctx.settings.backfill.resume,
        "Starting candle ingest service"
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let health_checker = ctx
        .pool
        .as_ref()
        .map(|pool| pool.spawn_health_checker(shutdown_tx.subscribe()));

    let scheduler = ctx.scheduler();
    let shutdown_rx = shutdown_tx.subscribe();
    let mut scheduler_task = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown requested, finishing in-flight pairs");
            let _ = shutdown_tx.send(());
            (&mut scheduler_task).await?
        }
        result = &mut scheduler_task => result?,
    };

    // Stops the health checker when the scheduler ended on its own
    let _ = shutdown_tx.send(());
    if let Some(handle) = health_checker {
        handle.await?;
    }

    let ticks = outcome?;
    info!(ticks, "Candle ingest service stopped");
    Ok(())
}
