//! Watchlist filters, qualification thresholds, metric snapshots, and the
//! ticker-to-external-id mapping cache.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use market_common::MarketMetrics;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use tracing::warn;

use crate::provider::coingecko::TickerIdCache;

use super::RepositoryResult;

/// Manual watchlist override kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// Forces permanent activation regardless of metrics
    Whitelist,
    /// Forces permanent deactivation regardless of metrics
    Blacklist,
}

impl FilterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKind::Whitelist => "whitelist",
            FilterKind::Blacklist => "blacklist",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "whitelist" => Some(FilterKind::Whitelist),
            "blacklist" => Some(FilterKind::Blacklist),
            _ => None,
        }
    }
}

/// Qualification thresholds an instrument must meet for automatic
/// inclusion. Owned by the configuration store; read-only here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualificationThresholds {
    pub min_volume_24h: Decimal,
    pub min_market_cap: Decimal,
}

/// Watchlist repository
#[derive(Clone)]
pub struct WatchlistRepository {
    pool: PgPool,
}

impl WatchlistRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All filter entries keyed by symbol name. An instrument has at most
    /// one entry (the symbol name is the primary key).
    pub async fn filters(&self) -> RepositoryResult<HashMap<String, FilterKind>> {
        let rows = sqlx::query("SELECT symbol_name, kind FROM watchlist_filters")
            .fetch_all(&self.pool)
            .await?;

        let mut filters = HashMap::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get("symbol_name");
            let kind: String = row.get("kind");
            if let Some(kind) = FilterKind::from_str(&kind) {
                filters.insert(name, kind);
            }
        }
        Ok(filters)
    }

    /// Set or replace the filter entry for a symbol.
    pub async fn set_filter(&self, symbol: &str, kind: FilterKind) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO watchlist_filters (symbol_name, kind)
            VALUES ($1, $2)
            ON CONFLICT (symbol_name) DO UPDATE SET kind = EXCLUDED.kind
            "#,
        )
        .bind(symbol)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove the filter entry for a symbol. Returns whether one existed.
    pub async fn clear_filter(&self, symbol: &str) -> RepositoryResult<bool> {
        let result = sqlx::query("DELETE FROM watchlist_filters WHERE symbol_name = $1")
            .bind(symbol)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Read the persisted qualification thresholds, if configured.
    pub async fn thresholds(&self) -> RepositoryResult<Option<QualificationThresholds>> {
        let row = sqlx::query(
            "SELECT min_volume_24h, min_market_cap FROM qualification_config LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| QualificationThresholds {
            min_volume_24h: row.get("min_volume_24h"),
            min_market_cap: row.get("min_market_cap"),
        }))
    }

    /// Upsert metric snapshots from an enrichment refresh.
    pub async fn upsert_metrics(&self, metrics: &[MarketMetrics]) -> RepositoryResult<usize> {
        if metrics.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for snapshot in metrics {
            sqlx::query(
                r#"
                INSERT INTO symbol_metrics (symbol_name, market_cap, volume_24h, fetched_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (symbol_name) DO UPDATE
                SET market_cap = EXCLUDED.market_cap,
                    volume_24h = EXCLUDED.volume_24h,
                    fetched_at = EXCLUDED.fetched_at
                "#,
            )
            .bind(&snapshot.symbol)
            .bind(snapshot.market_cap)
            .bind(snapshot.volume_24h)
            .bind(snapshot.fetched_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(metrics.len())
    }

    /// Latest metric snapshot per symbol.
    pub async fn metrics(&self) -> RepositoryResult<HashMap<String, MarketMetrics>> {
        let rows = sqlx::query(
            "SELECT symbol_name, market_cap, volume_24h, fetched_at FROM symbol_metrics",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut metrics = HashMap::with_capacity(rows.len());
        for row in rows {
            let symbol: String = row.get("symbol_name");
            metrics.insert(
                symbol.clone(),
                MarketMetrics {
                    symbol,
                    market_cap: row.get("market_cap"),
                    volume_24h: row.get("volume_24h"),
                    fetched_at: row.get("fetched_at"),
                },
            );
        }
        Ok(metrics)
    }

    /// Look up a persisted ticker → external-id mapping.
    pub async fn get_ticker_id(&self, ticker: &str) -> RepositoryResult<Option<String>> {
        let row = sqlx::query("SELECT external_id FROM ticker_ids WHERE ticker = $1")
            .bind(ticker)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("external_id")))
    }

    /// Persist a confirmed ticker → external-id mapping.
    pub async fn put_ticker_id(&self, ticker: &str, external_id: &str) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ticker_ids (ticker, external_id)
            VALUES ($1, $2)
            ON CONFLICT (ticker) DO UPDATE
            SET external_id = EXCLUDED.external_id, updated_at = NOW()
            "#,
        )
        .bind(ticker)
        .bind(external_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Ticker-id cache with an in-memory front over the persisted mapping.
pub struct CachedTickerIds {
    repository: Arc<WatchlistRepository>,
    front: DashMap<String, String>,
}

impl CachedTickerIds {
    pub fn new(repository: Arc<WatchlistRepository>) -> Self {
        Self {
            repository,
            front: DashMap::new(),
        }
    }
}

#[async_trait]
impl TickerIdCache for CachedTickerIds {
    async fn get(&self, ticker: &str) -> Option<String> {
        if let Some(id) = self.front.get(ticker) {
            return Some(id.clone());
        }
        match self.repository.get_ticker_id(ticker).await {
            Ok(Some(id)) => {
                self.front.insert(ticker.to_string(), id.clone());
                Some(id)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(ticker, error = %e, "ticker id lookup failed");
                None
            }
        }
    }

    async fn put(&self, ticker: &str, id: &str) {
        self.front.insert(ticker.to_string(), id.to_string());
        if let Err(e) = self.repository.put_ticker_id(ticker, id).await {
            warn!(ticker, error = %e, "failed to persist ticker id mapping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_kind_round_trip() {
        assert_eq!(FilterKind::Whitelist.as_str(), "whitelist");
        assert_eq!(FilterKind::from_str("blacklist"), Some(FilterKind::Blacklist));
        assert_eq!(FilterKind::from_str("greylist"), None);
    }
}
