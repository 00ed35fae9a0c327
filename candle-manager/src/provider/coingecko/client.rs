//! Enrichment REST client.
//!
//! High-volume background lookups isolate failures: a breaker-open or
//! exhausted-retry condition logs and yields an empty result so one
//! asset's failure never aborts a refresh batch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::EnrichmentSettings;
use crate::provider::{ProviderError, ProviderResult};
use crate::resilience::{CircuitBreaker, DualWindowRateLimiter, RetryPolicy};

use super::types::{CoinMarket, SearchResponse};

/// Persisted ticker → provider-id mapping cache.
///
/// Confirmed resolutions are written back so future lookups skip the
/// search round-trip.
#[async_trait]
pub trait TickerIdCache: Send + Sync {
    async fn get(&self, ticker: &str) -> Option<String>;
    async fn put(&self, ticker: &str, id: &str);
}

/// Enrichment REST client.
pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
    page_size: u32,
    rate_limiter: Arc<DualWindowRateLimiter>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

impl CoinGeckoClient {
    pub fn new(
        settings: &EnrichmentSettings,
        rate_limiter: Arc<DualWindowRateLimiter>,
        breaker: Arc<CircuitBreaker>,
    ) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| {
                ProviderError::Configuration(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: settings.rest_url.clone(),
            page_size: settings.page_size,
            rate_limiter,
            breaker,
            retry: RetryPolicy::default(),
        })
    }

    /// Fetch the top markets by capitalization, `pages` pages deep.
    ///
    /// Page failures are logged and skipped; the call returns whatever was
    /// fetched successfully.
    pub async fn top_markets(&self, pages: u32) -> Vec<CoinMarket> {
        let mut markets = Vec::new();
        for page in 1..=pages.max(1) {
            match self
                .retry
                .run("enrichment markets page", || self.markets_page(page))
                .await
            {
                Ok(mut batch) => {
                    debug!(page, count = batch.len(), "fetched markets page");
                    markets.append(&mut batch);
                }
                Err(e) => {
                    warn!(page, error = %e, "markets page fetch failed, skipping");
                }
            }
        }
        markets
    }

    async fn markets_page(&self, page: u32) -> ProviderResult<Vec<CoinMarket>> {
        let params = vec![
            ("vs_currency".to_string(), "usd".to_string()),
            ("order".to_string(), "market_cap_desc".to_string()),
            ("per_page".to_string(), self.page_size.to_string()),
            ("page".to_string(), page.to_string()),
        ];
        self.get_json("/coins/markets", &params).await
    }

    /// Fetch market entries for an explicit id list.
    pub async fn markets_by_ids(&self, ids: &[String]) -> ProviderResult<Vec<CoinMarket>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let params = vec![
            ("vs_currency".to_string(), "usd".to_string()),
            ("ids".to_string(), ids.join(",")),
        ];
        self.get_json("/coins/markets", &params).await
    }

    /// Free-text search across the provider's coin catalog.
    pub async fn search(&self, query: &str) -> ProviderResult<SearchResponse> {
        let params = vec![("query".to_string(), query.to_string())];
        self.get_json("/search", &params).await
    }

    /// Resolve a base-asset ticker to its market entry.
    ///
    /// Three tiers: (a) the persisted id-mapping cache, (b) full-text
    /// search confirmed by an exact ticker match, (c) a direct id guess
    /// from the lower-cased ticker. Whichever tier yields a confirmed
    /// match updates the cache. Failures are logged and yield `None`.
    pub async fn resolve_market(
        &self,
        ticker: &str,
        cache: &dyn TickerIdCache,
    ) -> Option<CoinMarket> {
        let ticker_lower = ticker.to_lowercase();

        // (a) cached mapping
        if let Some(id) = cache.get(&ticker_lower).await {
            if let Some(market) = self.market_by_id(&id).await {
                return Some(market);
            }
        }

        // (b) search, accepting only an exact ticker match
        match self.search(ticker).await {
            Ok(response) => {
                let hit = response
                    .coins
                    .iter()
                    .find(|c| c.symbol.eq_ignore_ascii_case(ticker));
                if let Some(coin) = hit {
                    if let Some(market) = self.market_by_id(&coin.id).await {
                        cache.put(&ticker_lower, &market.id).await;
                        return Some(market);
                    }
                }
            }
            Err(e) => {
                warn!(ticker, error = %e, "enrichment search failed");
            }
        }

        // (c) direct id guess from the lower-cased ticker
        if let Some(market) = self.market_by_id(&ticker_lower).await {
            if market.symbol.eq_ignore_ascii_case(ticker) {
                cache.put(&ticker_lower, &market.id).await;
                return Some(market);
            }
        }

        debug!(ticker, "no enrichment record resolved");
        None
    }

    async fn market_by_id(&self, id: &str) -> Option<CoinMarket> {
        match self.markets_by_ids(&[id.to_string()]).await {
            Ok(mut markets) if !markets.is_empty() => Some(markets.remove(0)),
            Ok(_) => None,
            Err(e) => {
                warn!(id, error = %e, "enrichment lookup by id failed");
                None
            }
        }
    }

    /// GET a JSON endpoint under the rate limiter and circuit breaker.
    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> ProviderResult<T> {
        self.rate_limiter.acquire().await;
        self.breaker.try_acquire()?;

        let result = self.send(endpoint, params).await;
        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(_) => self.breaker.record_failure(),
        }
        result
    }

    async fn send<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(String, String)],
    ) -> ProviderResult<T> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Request(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body)
            .map_err(|e| ProviderError::Parse(format!("failed to parse response: {}", e)))
    }
}
