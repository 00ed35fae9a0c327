//! Symbol lifecycle manager.
//!
//! Sole writer of the registry's `active`/`removed_at` columns. Computes
//! the qualified universe from enrichment metrics plus manual overrides,
//! performs the idempotent activate/deactivate/reactivate transitions,
//! runs the daily full reconciliation, and owns the retention purge.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use market_common::{EventBus, Interval, MarketMetrics, UniverseChanged};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::config::WatchlistSettings;
use crate::provider::binance::{BinanceRestClient, ExchangeSymbol};
use crate::provider::coingecko::{CoinGeckoClient, TickerIdCache};
use crate::storage::{
    FilterKind, PurgeReport, QualificationThresholds, RepositoryResult, SymbolRepository,
    WatchlistRepository,
};

fn parse_decimal(raw: &str) -> Option<Decimal> {
    use std::str::FromStr;
    Decimal::from_str(raw).ok()
}

/// Pure qualification rule.
///
/// Blacklisted instruments are excluded unconditionally; whitelisted ones
/// included unconditionally; everything else must meet both thresholds.
pub fn qualifies(
    metrics: Option<&MarketMetrics>,
    filter: Option<FilterKind>,
    thresholds: &QualificationThresholds,
) -> bool {
    match filter {
        Some(FilterKind::Blacklist) => false,
        Some(FilterKind::Whitelist) => true,
        None => metrics
            .map(|m| {
                m.volume_24h >= thresholds.min_volume_24h
                    && m.market_cap >= thresholds.min_market_cap
            })
            .unwrap_or(false),
    }
}

/// Result of a full watchlist sync.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Never-seen symbols created
    pub created: usize,
    /// Instruments newly added to the active set
    pub added: Vec<String>,
    /// Instruments removed from the active set
    pub removed: Vec<String>,
}

/// Market data gathered from the exchange and the enrichment API for one
/// qualification pass.
struct MarketData {
    /// Tradable contracts keyed by trading symbol
    tradable: HashMap<String, ExchangeSymbol>,
    /// Metric snapshots keyed by trading symbol
    metrics: HashMap<String, MarketMetrics>,
    /// Asset image URLs keyed by trading symbol
    images: HashMap<String, String>,
}

/// Symbol lifecycle manager.
pub struct LifecycleManager {
    settings: WatchlistSettings,
    market_pages: u32,
    exchange: Arc<BinanceRestClient>,
    enrichment: Arc<CoinGeckoClient>,
    symbols: SymbolRepository,
    watchlist: WatchlistRepository,
    id_cache: Arc<dyn TickerIdCache>,
    bus: EventBus,
}

impl LifecycleManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: WatchlistSettings,
        market_pages: u32,
        exchange: Arc<BinanceRestClient>,
        enrichment: Arc<CoinGeckoClient>,
        symbols: SymbolRepository,
        watchlist: WatchlistRepository,
        id_cache: Arc<dyn TickerIdCache>,
        bus: EventBus,
    ) -> Self {
        Self {
            settings,
            market_pages,
            exchange,
            enrichment,
            symbols,
            watchlist,
            id_cache,
            bus,
        }
    }

    /// Intervals tracked for every active instrument.
    pub fn tracked_intervals(&self) -> Vec<Interval> {
        let mut intervals = Vec::new();
        for name in &self.settings.intervals {
            match Interval::parse(name) {
                Ok(interval) => intervals.push(interval),
                Err(e) => warn!(error = %e, "ignoring unknown configured interval"),
            }
        }
        intervals
    }

    /// Effective thresholds: the persisted configuration row, or the
    /// settings-file fallback when none exists.
    pub async fn thresholds(&self) -> QualificationThresholds {
        match self.watchlist.thresholds().await {
            Ok(Some(thresholds)) => thresholds,
            Ok(None) => self.fallback_thresholds(),
            Err(e) => {
                warn!(error = %e, "threshold lookup failed, using configured fallback");
                self.fallback_thresholds()
            }
        }
    }

    fn fallback_thresholds(&self) -> QualificationThresholds {
        QualificationThresholds {
            min_volume_24h: Decimal::from(self.settings.min_volume_24h),
            min_market_cap: Decimal::from(self.settings.min_market_cap),
        }
    }

    /// Refresh the persisted metric snapshots from the enrichment API.
    /// Returns the number of snapshots written.
    pub async fn refresh_metrics(&self) -> usize {
        let data = self.collect_market_data().await;
        let snapshots: Vec<MarketMetrics> = data.metrics.into_values().collect();
        match self.watchlist.upsert_metrics(&snapshots).await {
            Ok(count) => {
                debug!(count, "metric snapshots refreshed");
                count
            }
            Err(e) => {
                warn!(error = %e, "metric snapshot upsert failed");
                0
            }
        }
    }

    /// Activate currently-inactive instruments. No-ops count as zero.
    pub async fn activate(&self, names: &[String]) -> RepositoryResult<u64> {
        let changed = self.symbols.activate(names).await?;
        if changed > 0 {
            self.bus.publish_universe_changed(UniverseChanged {
                added: names.to_vec(),
                removed: Vec::new(),
            });
        }
        Ok(changed)
    }

    /// Soft-delete currently-active instruments. No-ops count as zero.
    pub async fn deactivate(&self, names: &[String]) -> RepositoryResult<u64> {
        let changed = self.symbols.deactivate(names).await?;
        if changed > 0 {
            self.bus.publish_universe_changed(UniverseChanged {
                added: Vec::new(),
                removed: names.to_vec(),
            });
        }
        Ok(changed)
    }

    /// Reactivate inactive instruments whose latest persisted metric
    /// snapshot (or whitelist entry) satisfies the qualification rule.
    /// Returns the reactivated names so the caller can trigger an
    /// immediate backfill of their restarted history.
    pub async fn reactivate_meeting_criteria(&self) -> Vec<String> {
        let inactive = match self.symbols.list_inactive().await {
            Ok(inactive) => inactive,
            Err(e) => {
                warn!(error = %e, "inactive symbol lookup failed");
                return Vec::new();
            }
        };
        if inactive.is_empty() {
            return Vec::new();
        }

        let metrics = self.watchlist.metrics().await.unwrap_or_else(|e| {
            warn!(error = %e, "metric snapshot lookup failed");
            HashMap::new()
        });
        let filters = self.watchlist.filters().await.unwrap_or_else(|e| {
            warn!(error = %e, "filter lookup failed");
            HashMap::new()
        });
        let thresholds = self.thresholds().await;

        let to_activate: Vec<String> = inactive
            .into_iter()
            .filter(|name| {
                qualifies(metrics.get(name), filters.get(name).copied(), &thresholds)
            })
            .collect();
        if to_activate.is_empty() {
            return Vec::new();
        }

        match self.activate(&to_activate).await {
            Ok(changed) => {
                info!(reactivated = changed, "instruments reactivated");
                to_activate
            }
            Err(e) => {
                warn!(error = %e, "reactivation failed");
                Vec::new()
            }
        }
    }

    /// Full watchlist reconciliation: create never-seen qualified
    /// instruments, activate qualified ones, deactivate every active
    /// instrument absent from the fresh watchlist. Idempotent and safe to
    /// re-run.
    pub async fn sync_watchlist(&self) -> RepositoryResult<SyncReport> {
        let data = self.collect_market_data().await;

        // Keep the snapshots fresh for later reactivation checks.
        let snapshots: Vec<MarketMetrics> = data.metrics.values().cloned().collect();
        if let Err(e) = self.watchlist.upsert_metrics(&snapshots).await {
            warn!(error = %e, "metric snapshot upsert failed during sync");
        }

        let filters = self.watchlist.filters().await?;
        let thresholds = self.thresholds().await;

        let mut qualified: Vec<&ExchangeSymbol> = data
            .tradable
            .values()
            .filter(|s| {
                qualifies(
                    data.metrics.get(&s.symbol),
                    filters.get(&s.symbol).copied(),
                    &thresholds,
                )
            })
            .collect();
        qualified.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        for (name, kind) in &filters {
            if *kind == FilterKind::Whitelist && !data.tradable.contains_key(name) {
                warn!(symbol = %name, "whitelisted instrument is not a tradable contract, skipping");
            }
        }

        let previously_active = self.symbols.list_active().await?;

        let mut created = 0;
        for contract in &qualified {
            let existing = self.symbols.get(&contract.symbol).await?;
            if existing.is_none() {
                created += 1;
            }
            self.symbols
                .ensure(
                    &contract.symbol,
                    &contract.base_asset,
                    &contract.quote_asset,
                    data.images.get(&contract.symbol).map(String::as_str),
                )
                .await?;
        }

        let qualified_names: Vec<String> =
            qualified.iter().map(|s| s.symbol.clone()).collect();
        self.symbols.activate(&qualified_names).await?;

        let to_deactivate: Vec<String> = previously_active
            .iter()
            .filter(|name| !qualified_names.contains(*name))
            .cloned()
            .collect();
        self.symbols.deactivate(&to_deactivate).await?;

        let added: Vec<String> = qualified_names
            .iter()
            .filter(|name| !previously_active.contains(*name))
            .cloned()
            .collect();

        if !added.is_empty() || !to_deactivate.is_empty() {
            self.bus.publish_universe_changed(UniverseChanged {
                added: added.clone(),
                removed: to_deactivate.clone(),
            });
        }

        info!(
            qualified = qualified_names.len(),
            created,
            added = added.len(),
            removed = to_deactivate.len(),
            "watchlist sync complete"
        );

        Ok(SyncReport {
            created,
            added,
            removed: to_deactivate,
        })
    }

    /// Hard-delete instruments continuously inactive beyond the retention
    /// window, cascading their history. Explicitly invoked; `dry_run`
    /// reports counts without mutating.
    pub async fn purge_inactive(&self, dry_run: bool) -> RepositoryResult<PurgeReport> {
        let cutoff = Utc::now() - Duration::days(self.settings.retention_days);
        self.symbols.purge_inactive_before(cutoff, dry_run).await
    }

    /// Gather tradable contracts, metric snapshots, and asset images for
    /// one qualification pass. Upstream failures are isolated: a failed
    /// fetch yields an empty section, never an error.
    ///
    /// 24h quote volume comes from the exchange ticker; market cap and
    /// images from the enrichment API, with the enrichment volume as a
    /// fallback when the ticker is unavailable.
    async fn collect_market_data(&self) -> MarketData {
        let contracts = match self.exchange.perpetual_symbols().await {
            Ok(contracts) => contracts,
            Err(e) => {
                warn!(error = %e, "exchange metadata fetch failed");
                Vec::new()
            }
        };

        let tradable: HashMap<String, ExchangeSymbol> = contracts
            .into_iter()
            .filter(|s| s.quote_asset == self.settings.quote_asset)
            .map(|s| (s.symbol.clone(), s))
            .collect();

        let by_base: HashMap<String, String> = tradable
            .values()
            .map(|s| (s.base_asset.to_uppercase(), s.symbol.clone()))
            .collect();

        let quote_volumes: HashMap<String, Decimal> = match self.exchange.all_tickers_24h().await
        {
            Ok(tickers) => tickers
                .iter()
                .filter_map(|t| {
                    parse_decimal(&t.quote_volume).map(|volume| (t.symbol.clone(), volume))
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "bulk ticker fetch failed");
                HashMap::new()
            }
        };

        let mut metrics = HashMap::new();
        let mut images = HashMap::new();

        for market in self.enrichment.top_markets(self.market_pages).await {
            let base = market.symbol.to_uppercase();
            if let Some(symbol) = by_base.get(&base) {
                let volume = quote_volumes
                    .get(symbol)
                    .copied()
                    .unwrap_or_else(|| market.volume_decimal());
                metrics.insert(
                    symbol.clone(),
                    MarketMetrics::new(symbol.clone(), market.market_cap_decimal(), volume),
                );
                if let Some(image) = market.image {
                    images.insert(symbol.clone(), image);
                }
            }
        }

        // Whitelisted instruments outside the top markets still need
        // metrics and images; resolve them individually.
        let filters = self.watchlist.filters().await.unwrap_or_else(|e| {
            warn!(error = %e, "filter lookup failed");
            HashMap::new()
        });
        for (name, kind) in filters {
            if kind != FilterKind::Whitelist || metrics.contains_key(&name) {
                continue;
            }
            let Some(contract) = tradable.get(&name) else {
                continue;
            };
            let Some(market) = self
                .enrichment
                .resolve_market(&contract.base_asset, &*self.id_cache)
                .await
            else {
                continue;
            };

            let volume = match quote_volumes.get(&name) {
                Some(volume) => *volume,
                None => match self.exchange.ticker_24h(&name).await {
                    Ok(ticker) => {
                        parse_decimal(&ticker.quote_volume).unwrap_or_else(|| market.volume_decimal())
                    }
                    Err(e) => {
                        warn!(symbol = %name, error = %e, "single ticker fetch failed");
                        market.volume_decimal()
                    }
                },
            };

            metrics.insert(
                name.clone(),
                MarketMetrics::new(name.clone(), market.market_cap_decimal(), volume),
            );
            if let Some(image) = market.image {
                images.insert(name.clone(), image);
            }
        }

        MarketData {
            tradable,
            metrics,
            images,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn thresholds() -> QualificationThresholds {
        QualificationThresholds {
            min_volume_24h: dec!(50000000),
            min_market_cap: dec!(50000000),
        }
    }

    fn metrics(volume: Decimal, cap: Decimal) -> MarketMetrics {
        MarketMetrics::new("ALPHAUSDT", cap, volume)
    }

    #[test]
    fn blacklist_excludes_even_when_thresholds_met() {
        let m = metrics(dec!(90000000), dec!(90000000));
        assert!(!qualifies(
            Some(&m),
            Some(FilterKind::Blacklist),
            &thresholds()
        ));
    }

    #[test]
    fn whitelist_includes_even_when_thresholds_fail() {
        let m = metrics(dec!(1), dec!(1));
        assert!(qualifies(Some(&m), Some(FilterKind::Whitelist), &thresholds()));
        // Whitelist wins even with no metrics at all.
        assert!(qualifies(None, Some(FilterKind::Whitelist), &thresholds()));
    }

    #[test]
    fn unfiltered_requires_both_thresholds() {
        assert!(qualifies(
            Some(&metrics(dec!(50000000), dec!(50000000))),
            None,
            &thresholds()
        ));
        assert!(!qualifies(
            Some(&metrics(dec!(50000000), dec!(49999999))),
            None,
            &thresholds()
        ));
        assert!(!qualifies(
            Some(&metrics(dec!(49999999), dec!(50000000))),
            None,
            &thresholds()
        ));
    }

    #[test]
    fn volume_below_threshold_excludes_until_whitelisted() {
        // 24h volume 40M, market cap 60M, thresholds both 50M.
        let m = metrics(dec!(40000000), dec!(60000000));
        assert!(!qualifies(Some(&m), None, &thresholds()));
        assert!(qualifies(Some(&m), Some(FilterKind::Whitelist), &thresholds()));
    }

    #[test]
    fn missing_metrics_exclude_unfiltered_instruments() {
        assert!(!qualifies(None, None, &thresholds()));
    }
}
