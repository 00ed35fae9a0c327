//! Command-line interface and shared service wiring.

pub mod backfill;
pub mod db;
pub mod serve;
pub mod symbol;

use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use market_common::EventBus;
use tracing::warn;

use crate::config::Settings;
use crate::provider::binance::BinanceRestClient;
use crate::provider::coingecko::CoinGeckoClient;
use crate::reconcile::BackfillReconciler;
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, DualWindowRateLimiter, RateLimitCeilings,
};
use crate::storage::{
    CachedTickerIds, CandleRepository, Storage, SymbolRepository, WatchlistRepository,
};
use crate::symbol::LifecycleManager;

/// Candle Manager CLI
#[derive(Parser)]
#[command(name = "candle-manager", version, about = "Resilient OHLCV ingestion service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the ingestion service
    Serve(serve::ServeArgs),
    /// Reconcile candle history on demand
    Backfill(backfill::BackfillArgs),
    /// Symbol management commands
    #[command(subcommand)]
    Symbol(symbol::SymbolCommand),
    /// Database operations
    #[command(subcommand)]
    Db(db::DbCommand),
}

/// Load settings, falling back to defaults when no configuration files
/// are present.
pub(crate) fn load_settings() -> Settings {
    match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            warn!(error = %e, "failed to load configuration, using defaults");
            Settings::default_settings()
        }
    }
}

/// Shared service components, wired once per command.
pub(crate) struct Context {
    pub settings: Settings,
    pub bus: EventBus,
    pub candles: CandleRepository,
    pub symbols: SymbolRepository,
    pub watchlist: WatchlistRepository,
    pub lifecycle: Arc<LifecycleManager>,
    pub reconciler: Arc<BackfillReconciler>,
}

impl Context {
    /// Connect storage (fatal on failure), run migrations, and build the
    /// provider clients behind their rate limiters and circuit breakers.
    pub async fn init(settings: Settings) -> anyhow::Result<Self> {
        let storage = Storage::connect(&settings.database)
            .await
            .context("initial database connectivity check failed")?;
        storage.run_migrations().await?;

        let bus = EventBus::new();

        let breaker_config = CircuitBreakerConfig {
            failure_threshold: settings.breaker.failure_threshold,
            recovery_timeout: std::time::Duration::from_secs(
                settings.breaker.recovery_timeout_secs,
            ),
        };

        let exchange_limiter = Arc::new(DualWindowRateLimiter::new(RateLimitCeilings {
            requests_per_second: settings.exchange.requests_per_second,
            requests_per_minute: settings.exchange.requests_per_minute,
        }));
        let exchange_breaker = Arc::new(CircuitBreaker::new("exchange", breaker_config));
        let exchange = Arc::new(BinanceRestClient::new(
            &settings.exchange,
            exchange_limiter,
            exchange_breaker,
        )?);

        let enrichment_limiter = Arc::new(DualWindowRateLimiter::new(RateLimitCeilings {
            requests_per_second: settings.enrichment.requests_per_second,
            requests_per_minute: settings.enrichment.requests_per_minute,
        }));
        let enrichment_breaker = Arc::new(CircuitBreaker::new("enrichment", breaker_config));
        let enrichment = Arc::new(CoinGeckoClient::new(
            &settings.enrichment,
            enrichment_limiter,
            enrichment_breaker,
        )?);

        let candles = CandleRepository::new(storage.pool().clone());
        let symbols = SymbolRepository::new(storage.pool().clone());
        let watchlist = WatchlistRepository::new(storage.pool().clone());
        let id_cache = Arc::new(CachedTickerIds::new(Arc::new(watchlist.clone())));

        let lifecycle = Arc::new(LifecycleManager::new(
            settings.watchlist.clone(),
            settings.enrichment.market_pages,
            Arc::clone(&exchange),
            Arc::clone(&enrichment),
            symbols.clone(),
            watchlist.clone(),
            id_cache,
            bus.clone(),
        ));

        let reconciler = Arc::new(BackfillReconciler::new(
            &settings.backfill,
            Arc::clone(&exchange),
            candles.clone(),
        ));

        Ok(Self {
            settings,
            bus,
            candles,
            symbols,
            watchlist,
            lifecycle,
            reconciler,
        })
    }
}
