//! Symbol management commands.

use anyhow::Result;
use clap::Subcommand;

use crate::cli::{load_settings, Context};
use crate::storage::FilterKind;

/// Symbol management subcommands
#[derive(Subcommand)]
pub enum SymbolCommand {
    /// List registered symbols
    List {
        /// Include inactive symbols
        #[arg(long)]
        all: bool,
    },
    /// Activate symbols by name
    Activate { names: Vec<String> },
    /// Deactivate (soft-delete) symbols by name
    Deactivate { names: Vec<String> },
    /// Run a full watchlist reconciliation now
    Sync,
    /// Force permanent activation of a symbol
    Whitelist { name: String },
    /// Force permanent deactivation of a symbol
    Blacklist { name: String },
    /// Remove a symbol's whitelist/blacklist entry
    Unfilter { name: String },
    /// Hard-delete symbols inactive beyond the retention window
    Purge {
        /// Report what would be deleted without mutating
        #[arg(long)]
        dry_run: bool,
    },
}

/// Execute a symbol subcommand
pub async fn execute(command: SymbolCommand) -> Result<()> {
    let settings = load_settings();
    let ctx = Context::init(settings).await?;

    match command {
        SymbolCommand::List { all } => {
            let records = ctx.symbols.list().await?;
            for record in records {
                if !all && !record.active {
                    continue;
                }
                let status = if record.active {
                    "active".to_string()
                } else {
                    match record.removed_at {
                        Some(at) => format!("inactive since {}", at.format("%Y-%m-%d")),
                        None => "inactive".to_string(),
                    }
                };
                println!(
                    "{:<14} {:<6}/{:<6} {}",
                    record.name, record.base_asset, record.quote_asset, status
                );
            }
        }
        SymbolCommand::Activate { names } => {
            let names: Vec<String> = names.iter().map(|n| n.to_uppercase()).collect();
            let changed = ctx.lifecycle.activate(&names).await?;
            println!("Activated {} of {} symbols", changed, names.len());
        }
        SymbolCommand::Deactivate { names } => {
            let names: Vec<String> = names.iter().map(|n| n.to_uppercase()).collect();
            let changed = ctx.lifecycle.deactivate(&names).await?;
            println!("Deactivated {} of {} symbols", changed, names.len());
        }
        SymbolCommand::Sync => {
            let report = ctx.lifecycle.sync_watchlist().await?;
            println!(
                "Watchlist sync: {} created, {} added, {} removed",
                report.created,
                report.added.len(),
                report.removed.len()
            );
        }
        SymbolCommand::Whitelist { name } => {
            let name = name.to_uppercase();
            ctx.watchlist.set_filter(&name, FilterKind::Whitelist).await?;
            ctx.bus.publish_config_changed();
            println!("Whitelisted {}", name);
        }
        SymbolCommand::Blacklist { name } => {
            let name = name.to_uppercase();
            ctx.watchlist.set_filter(&name, FilterKind::Blacklist).await?;
            ctx.bus.publish_config_changed();
            println!("Blacklisted {}", name);
        }
        SymbolCommand::Unfilter { name } => {
            let name = name.to_uppercase();
            let existed = ctx.watchlist.clear_filter(&name).await?;
            ctx.bus.publish_config_changed();
            if existed {
                println!("Removed filter for {}", name);
            } else {
                println!("No filter entry for {}", name);
            }
        }
        SymbolCommand::Purge { dry_run } => {
            let report = ctx.lifecycle.purge_inactive(dry_run).await?;
            if report.dry_run {
                println!(
                    "Would purge {} symbols ({} candles)",
                    report.symbols.len(),
                    report.candles
                );
            } else {
                println!(
                    "Purged {} symbols ({} candles)",
                    report.symbols.len(),
                    report.candles
                );
            }
            for symbol in &report.symbols {
                println!("  {}", symbol);
            }
        }
    }

    Ok(())
}
