//! Candle Ingest CLI
//!
//! Provides commands for:
//! - `serve`: Run scheduled backfill ticks
//! - `backfill`: Run one backfill tick
//! - `query`: Read stored candles through the query cache
//! - `pairs`: Tracked pair management
//! - `db`: Database operations

use anyhow::Result;
use clap::Parser;

use candle_common::logging::{init_logging, LogConfig};
use candle_ingest::cli::{Cli, Commands};
use candle_ingest::config::Settings;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    // LOG_FORMAT selects explicitly; otherwise JSON for the service, compact for commands
    let log_config = if std::env::var_os("LOG_FORMAT").is_some() {
        LogConfig::from_env()
    } else if matches!(cli.command, Commands::Serve(_)) {
        LogConfig::service()
    } else {
        LogConfig::cli()
    };
    init_logging(log_config.with_app_name("candle-ingest")).map_err(|e| anyhow::anyhow!(e))?;

    let settings = Settings::load()?;
    settings.validate()?;

    match cli.command {
        Commands::Serve(args) => candle_ingest::cli::serve::execute(args, settings).await?,
        Commands::Backfill(args) => candle_ingest::cli::backfill::execute(args, settings).await?,
        Commands::Query(args) => candle_ingest::cli::query::execute(args, settings).await?,
        Commands::Pairs(cmd) => candle_ingest::cli::pairs::execute(cmd, settings).await?,
        Commands::Db(cmd) => candle_ingest::cli::db::execute(cmd, settings).await?,
    }

    Ok(())
}
