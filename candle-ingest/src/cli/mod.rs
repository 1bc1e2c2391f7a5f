//! Command-line interface
//!
//! Provides CLI commands for the candle ingestion service.

pub mod backfill;
pub mod db;
pub mod pairs;
pub mod query;
pub mod serve;

use clap::{Parser, Subcommand};

/// Candle ingestion CLI
#[derive(Parser)]
#[command(name = "candle-ingest")]
#[command(about = "Resilient candle backfill, validation and query service")]
#[command(version)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run backfill ticks on a schedule until Ctrl-C
    Serve(serve::ServeArgs),
    /// Run a single backfill tick and print its summary
    Backfill(backfill::BackfillArgs),
    /// Query stored candles
    Query(query::QueryArgs),
    /// Tracked pair management
    #[command(subcommand)]
    Pairs(pairs::PairsCommands),
    /// Database operations
    #[command(subcommand)]
    Db(db::DbCommands),
}
