//! Database operations.

use anyhow::{Context as _, Result};
use clap::Subcommand;

use crate::cli::load_settings;
use crate::storage::Storage;

/// Database subcommands
#[derive(Subcommand)]
pub enum DbCommand {
    /// Apply schema migrations
    Migrate,
    /// Show database statistics
    Stats,
}

/// Execute a database subcommand
pub async fn execute(command: DbCommand) -> Result<()> {
    let settings = load_settings();
    let storage = Storage::connect(&settings.database)
        .await
        .context("database connection failed")?;

    match command {
        DbCommand::Migrate => {
            storage.run_migrations().await?;
            println!("Migrations applied");
        }
        DbCommand::Stats => {
            storage.run_migrations().await?;
            let stats = storage.stats().await?;
            println!("Symbols:  {} ({} active)", stats.total_symbols, stats.active_symbols);
            println!("Candles:  {}", stats.total_candles);
            match (stats.earliest_candle, stats.latest_candle) {
                (Some(earliest), Some(latest)) => {
                    println!("Coverage: {} to {}", earliest, latest);
                }
                _ => println!("Coverage: no candle data"),
            }
        }
    }

    Ok(())
}
