//! Backfill command - reconcile candle history on demand.

use anyhow::Result;
use clap::Args;
use market_common::Interval;
use tracing::info;

use crate::cli::{load_settings, Context};

/// Arguments for the backfill command
#[derive(Args)]
pub struct BackfillArgs {
    /// Symbol to reconcile (defaults to every active symbol)
    #[arg(long, short)]
    pub symbol: Option<String>,

    /// Interval to reconcile (defaults to every tracked interval)
    #[arg(long, short)]
    pub interval: Option<String>,
}

/// Execute the backfill command
pub async fn execute(args: BackfillArgs) -> Result<()> {
    let settings = load_settings();
    let ctx = Context::init(settings).await?;

    let intervals = match &args.interval {
        Some(name) => vec![Interval::parse(name)?],
        None => ctx.lifecycle.tracked_intervals(),
    };

    let symbols = match &args.symbol {
        Some(symbol) => vec![symbol.to_uppercase()],
        None => ctx.symbols.list_active().await?,
    };

    if symbols.is_empty() {
        info!("no active symbols to reconcile");
        return Ok(());
    }

    let pairs: Vec<(String, Interval)> = symbols
        .iter()
        .flat_map(|symbol| {
            intervals
                .iter()
                .map(move |interval| (symbol.clone(), *interval))
        })
        .collect();

    info!(pairs = pairs.len(), "starting on-demand reconciliation");
    let summary = ctx.reconciler.sweep(pairs).await;

    println!(
        "Reconciled {} pairs: {} inserted, {} updated, {} errors",
        summary.pairs, summary.inserted, summary.updated, summary.errors
    );
    Ok(())
}
