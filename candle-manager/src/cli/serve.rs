//! Serve command - run the ingestion service.
//!
//! Wires the streaming consumer, the periodic enrichment refresh, the
//! gap-detection sweep, the daily watchlist sync, the retention purge,
//! and the bus listeners into cooperatively shutdown background tasks.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use market_common::Interval;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cli::{load_settings, Context};
use crate::storage::SymbolRepository;
use crate::stream::{resubscribe_channel, CandleBatcher, KlineStreamConsumer};
use crate::symbol::SymbolUniverse;

/// Arguments for the serve command
#[derive(Args)]
pub struct ServeArgs {
    /// Run a full watchlist sync before streaming starts, even when the
    /// registry already has active symbols
    #[arg(long)]
    pub sync_on_start: bool,
}

/// Execute the serve command
pub async fn execute(args: ServeArgs) -> Result<()> {
    let settings = load_settings();
    info!("starting candle manager service");

    // Fatal when the initial connectivity check fails.
    let ctx = Context::init(settings).await?;
    let settings = &ctx.settings;

    let intervals = ctx.lifecycle.tracked_intervals();
    if intervals.is_empty() {
        return Err(anyhow::anyhow!("no valid candle intervals configured"));
    }

    // Bootstrap the in-memory universe from the symbol registry; run the
    // initial full sync when the registry is empty.
    let universe = Arc::new(SymbolUniverse::new(intervals.clone()));
    let (resubscriber, resubscribe_rx) = resubscribe_channel();
    universe.subscribe(resubscriber);

    let mut active = ctx.symbols.list_active().await?;
    if active.is_empty() || args.sync_on_start {
        info!("running initial watchlist sync");
        match ctx.lifecycle.sync_watchlist().await {
            Ok(report) => info!(
                created = report.created,
                added = report.added.len(),
                removed = report.removed.len(),
                "initial watchlist sync complete"
            ),
            Err(e) => error!(error = %e, "initial watchlist sync failed"),
        }
        active = ctx.symbols.list_active().await?;
    }
    info!(instruments = active.len(), "universe bootstrapped");
    universe.update(active, intervals.clone());

    // Shutdown fan-out: signal handlers flip it, every task selects on it.
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    spawn_signal_handler(shutdown_tx.clone());

    let batcher = Arc::new(CandleBatcher::new(
        &settings.batch,
        ctx.candles.clone(),
        ctx.bus.clone(),
    ));
    let consumer = KlineStreamConsumer::new(
        &settings.stream,
        settings.exchange.ws_url.clone(),
        Arc::clone(&batcher),
        Arc::clone(&universe),
        resubscribe_rx,
    );
    let counters = consumer.counters();

    let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

    tasks.push((
        "stream",
        tokio::spawn(consumer.run(shutdown_tx.subscribe())),
    ));

    // Periodic enrichment refresh: update metric snapshots, reactivate
    // instruments meeting the criteria again, and backfill their
    // restarted history immediately.
    {
        let lifecycle = Arc::clone(&ctx.lifecycle);
        let reconciler = Arc::clone(&ctx.reconciler);
        let intervals = intervals.clone();
        let mut shutdown = shutdown_tx.subscribe();
        let period = Duration::from_secs(settings.scheduler.enrichment_interval_secs);
        tasks.push((
            "enrichment",
            tokio::spawn(async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let refreshed = lifecycle.refresh_metrics().await;
                            debug!(refreshed, "enrichment refresh complete");

                            let reactivated = lifecycle.reactivate_meeting_criteria().await;
                            if !reactivated.is_empty() {
                                let pairs = cartesian(&reactivated, &intervals);
                                reconciler.sweep(pairs).await;
                            }
                        }
                        _ = shutdown.recv() => break,
                    }
                }
            }),
        ));
    }

    // Periodic gap-detection sweep over the whole active universe.
    {
        let reconciler = Arc::clone(&ctx.reconciler);
        let universe = Arc::clone(&universe);
        let mut shutdown = shutdown_tx.subscribe();
        let period = Duration::from_secs(settings.scheduler.sweep_interval_secs);
        tasks.push((
            "gap-sweep",
            tokio::spawn(async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let (symbols, intervals) = universe.snapshot();
                            let pairs = cartesian(&symbols, &intervals);
                            reconciler.sweep(pairs).await;
                        }
                        _ = shutdown.recv() => break,
                    }
                }
            }),
        ));
    }

    // Daily full watchlist reconciliation.
    {
        let lifecycle = Arc::clone(&ctx.lifecycle);
        let mut shutdown = shutdown_tx.subscribe();
        let period = Duration::from_secs(settings.scheduler.watchlist_sync_interval_secs);
        tasks.push((
            "watchlist-sync",
            tokio::spawn(async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = lifecycle.sync_watchlist().await {
                                error!(error = %e, "watchlist sync failed");
                            }
                        }
                        _ = shutdown.recv() => break,
                    }
                }
            }),
        ));
    }

    // Monthly retention purge.
    {
        let lifecycle = Arc::clone(&ctx.lifecycle);
        let mut shutdown = shutdown_tx.subscribe();
        let period = Duration::from_secs(settings.scheduler.purge_interval_secs);
        tasks.push((
            "retention-purge",
            tokio::spawn(async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            match lifecycle.purge_inactive(false).await {
                                Ok(report) => info!(
                                    symbols = report.symbols.len(),
                                    candles = report.candles,
                                    "retention purge complete"
                                ),
                                Err(e) => error!(error = %e, "retention purge failed"),
                            }
                        }
                        _ = shutdown.recv() => break,
                    }
                }
            }),
        ));
    }

    // Universe-changed listener: lifecycle transitions publish events; the
    // in-memory universe is refreshed from the registry so the stream
    // resubscribes.
    {
        let symbols = ctx.symbols.clone();
        let universe = Arc::clone(&universe);
        let intervals = intervals.clone();
        let mut events = ctx.bus.subscribe_universe_changed();
        let mut shutdown = shutdown_tx.subscribe();
        tasks.push((
            "universe-listener",
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        event = events.recv() => match event {
                            Ok(change) => {
                                debug!(
                                    added = change.added.len(),
                                    removed = change.removed.len(),
                                    "universe change announced"
                                );
                                refresh_universe(&symbols, &universe, &intervals).await;
                            }
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!(skipped, "universe listener lagged, refreshing");
                                refresh_universe(&symbols, &universe, &intervals).await;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        },
                        _ = shutdown.recv() => break,
                    }
                }
            }),
        ));
    }

    // Qualification-config listener: an external edit triggers an
    // immediate lifecycle re-evaluation.
    {
        let lifecycle = Arc::clone(&ctx.lifecycle);
        let mut events = ctx.bus.subscribe_config_changed();
        let mut shutdown = shutdown_tx.subscribe();
        tasks.push((
            "config-listener",
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        event = events.recv() => match event {
                            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                                info!("qualification config changed, re-evaluating watchlist");
                                if let Err(e) = lifecycle.sync_watchlist().await {
                                    error!(error = %e, "watchlist re-evaluation failed");
                                }
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        },
                        _ = shutdown.recv() => break,
                    }
                }
            }),
        ));
    }

    // Housekeeping: periodic ingestion statistics.
    {
        let batcher = Arc::clone(&batcher);
        let counters = Arc::clone(&counters);
        let mut shutdown = shutdown_tx.subscribe();
        tasks.push((
            "housekeeping",
            tokio::spawn(async move {
                let mut ticker = interval(Duration::from_secs(60));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let pending = batcher.pending().await;
                            info!(
                                received = counters.messages_received(),
                                parse_errors = counters.parse_errors(),
                                pending = pending,
                                "ingestion stats"
                            );
                        }
                        _ = shutdown.recv() => break,
                    }
                }
            }),
        ));
    }

    info!(tasks = tasks.len(), "service running");

    // Wait for the shutdown signal, then give every task a bounded grace
    // period before aborting it.
    let mut shutdown_rx = shutdown_tx.subscribe();
    let _ = shutdown_rx.recv().await;
    info!("shutting down");

    let grace = Duration::from_secs(settings.scheduler.shutdown_grace_secs);
    for (name, mut handle) in tasks {
        match timeout(grace, &mut handle).await {
            Ok(_) => debug!(task = name, "task stopped"),
            Err(_) => {
                warn!(task = name, "task did not stop within grace period, aborting");
                handle.abort();
            }
        }
    }

    info!("candle manager service stopped");
    Ok(())
}

/// Signal handler task: standard termination signals flip the shutdown
/// flag observed by every loop.
fn spawn_signal_handler(shutdown_tx: broadcast::Sender<()>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut term = match signal(SignalKind::terminate()) {
                Ok(term) => term,
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received interrupt signal"),
                _ = term.recv() => info!("received terminate signal"),
            }
        }
        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl+c");
                return;
            }
            info!("received interrupt signal");
        }
        let _ = shutdown_tx.send(());
    });
}

/// All (symbol, interval) pairs for a sweep.
fn cartesian(symbols: &[String], intervals: &[Interval]) -> Vec<(String, Interval)> {
    symbols
        .iter()
        .flat_map(|symbol| {
            intervals
                .iter()
                .map(move |interval| (symbol.clone(), *interval))
        })
        .collect()
}

/// Reload the active instrument list from the registry into the
/// in-memory universe.
async fn refresh_universe(
    symbols: &SymbolRepository,
    universe: &SymbolUniverse,
    intervals: &[Interval],
) {
    match symbols.list_active().await {
        Ok(active) => {
            universe.update(active, intervals.to_vec());
        }
        Err(e) => warn!(error = %e, "failed to reload active instruments"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cartesian_covers_every_pair() {
        let symbols = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()];
        let intervals = vec![Interval::OneMinute, Interval::OneHour];
        let pairs = cartesian(&symbols, &intervals);
        assert_eq!(pairs.len(), 4);
        assert!(pairs.contains(&("ETHUSDT".to_string(), Interval::OneMinute)));
    }
}
