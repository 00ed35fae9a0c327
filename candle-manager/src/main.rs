//! Candle Manager CLI
//!
//! Provides commands for:
//! - `serve`: Start the ingestion service
//! - `backfill`: Reconcile candle history on demand
//! - `symbol`: Symbol management commands
//! - `db`: Database operations

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use candle_manager::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("candle_manager=info".parse()?))
        .init();

    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Execute command
    match cli.command {
        Commands::Serve(args) => {
            candle_manager::cli::serve::execute(args).await?;
        }
        Commands::Backfill(args) => {
            candle_manager::cli::backfill::execute(args).await?;
        }
        Commands::Symbol(cmd) => {
            candle_manager::cli::symbol::execute(cmd).await?;
        }
        Commands::Db(cmd) => {
            candle_manager::cli::db::execute(cmd).await?;
        }
    }

    Ok(())
}
