//! Exchange REST client.
//!
//! Fetches candle history, 24h tickers, and contract metadata. Every call
//! passes through the rate limiter, then the circuit breaker; HTTP 429 maps
//! to a dedicated rate-limit error so callers can back off harder.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use market_common::{Candle, Interval};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::ExchangeSettings;
use crate::provider::{ProviderError, ProviderResult};
use crate::resilience::{CircuitBreaker, DualWindowRateLimiter};

use super::types::{ExchangeInfo, Ticker24h};

/// A tradable perpetual contract from the exchange metadata endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSymbol {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
}

/// Exchange REST client.
pub struct BinanceRestClient {
    client: Client,
    base_url: String,
    kline_limit_max: u32,
    rate_limiter: Arc<DualWindowRateLimiter>,
    breaker: Arc<CircuitBreaker>,
}

impl BinanceRestClient {
    pub fn new(
        settings: &ExchangeSettings,
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
            kline_limit_max: settings.kline_limit_max,
            rate_limiter,
            breaker,
        })
    }

    /// Fetch candle history for one (symbol, interval).
    ///
    /// `limit` is clamped to the exchange maximum; `start`/`end` bound the
    /// window in epoch milliseconds when provided.
    pub async fn klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: u32,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> ProviderResult<Vec<Candle>> {
        let limit = limit.min(self.kline_limit_max);
        let mut params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("interval".to_string(), interval.as_str().to_string()),
            ("limit".to_string(), limit.to_string()),
        ];
        if let Some(start) = start {
            params.push(("startTime".to_string(), start.timestamp_millis().to_string()));
        }
        if let Some(end) = end {
            params.push(("endTime".to_string(), end.timestamp_millis().to_string()));
        }

        let rows: Vec<Vec<Value>> = self.get_json("/fapi/v1/klines", &params).await?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in &rows {
            candles.push(kline_row_to_candle(row, symbol, interval)?);
        }
        debug!(symbol, interval = %interval, count = candles.len(), "fetched klines");
        Ok(candles)
    }

    /// Fetch the 24h ticker for a single contract.
    pub async fn ticker_24h(&self, symbol: &str) -> ProviderResult<Ticker24h> {
        let params = vec![("symbol".to_string(), symbol.to_string())];
        self.get_json("/fapi/v1/ticker/24hr", &params).await
    }

    /// Fetch 24h tickers for all contracts.
    pub async fn all_tickers_24h(&self) -> ProviderResult<Vec<Ticker24h>> {
        self.get_json("/fapi/v1/ticker/24hr", &[]).await
    }

    /// Fetch contract metadata, filtered client-side to perpetual contracts
    /// that are currently trading.
    pub async fn perpetual_symbols(&self) -> ProviderResult<Vec<ExchangeSymbol>> {
        let info: ExchangeInfo = self.get_json("/fapi/v1/exchangeInfo", &[]).await?;

        let symbols = info
            .symbols
            .into_iter()
            .filter(|s| s.contract_type == "PERPETUAL" && s.status == "TRADING")
            .map(|s| ExchangeSymbol {
                symbol: s.symbol,
                base_asset: s.base_asset,
                quote_asset: s.quote_asset,
            })
            .collect();
        Ok(symbols)
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

/// Convert one REST kline row (`[openTime, open, high, low, close, volume,
/// closeTime, ...]`) into a canonical candle.
pub(crate) fn kline_row_to_candle(
    row: &[Value],
    symbol: &str,
    interval: Interval,
) -> ProviderResult<Candle> {
    if row.len() < 6 {
        return Err(ProviderError::Parse(format!(
            "kline row has {} fields, expected at least 6",
            row.len()
        )));
    }

    let open_time_ms = row[0]
        .as_i64()
        .ok_or_else(|| ProviderError::Parse("kline open time is not an integer".into()))?;
    let open_time = Utc
        .timestamp_millis_opt(open_time_ms)
        .single()
        .ok_or_else(|| ProviderError::Parse(format!("invalid open time: {}", open_time_ms)))?;

    let decimal_at = |idx: usize, name: &str| -> ProviderResult<Decimal> {
        let raw = row[idx]
            .as_str()
            .ok_or_else(|| ProviderError::Parse(format!("kline {} is not a string", name)))?;
        Decimal::from_str(raw)
            .map_err(|e| ProviderError::Parse(format!("invalid {} '{}': {}", name, raw, e)))
    };

    Ok(Candle {
        symbol: symbol.to_string(),
        interval,
        open_time,
        open: decimal_at(1, "open")?,
        high: decimal_at(2, "high")?,
        low: decimal_at(3, "low")?,
        close: decimal_at(4, "close")?,
        volume: decimal_at(5, "volume")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn sample_row() -> Vec<Value> {
        json!([
            1672515780000i64,
            "16500.10",
            "16505.00",
            "16499.00",
            "16503.40",
            "12.5",
            1672515839999i64,
            "206000.0",
            150,
            "6.1",
            "100700.0",
            "0"
        ])
        .as_array()
        .unwrap()
        .clone()
    }

    #[test]
    fn converts_kline_row() {
        let candle = kline_row_to_candle(&sample_row(), "BTCUSDT", Interval::OneMinute).unwrap();
        assert_eq!(candle.symbol, "BTCUSDT");
        assert_eq!(candle.open, dec!(16500.10));
        assert_eq!(candle.high, dec!(16505.00));
        assert_eq!(candle.low, dec!(16499.00));
        assert_eq!(candle.close, dec!(16503.40));
        assert_eq!(candle.volume, dec!(12.5));
        assert_eq!(candle.open_time.timestamp_millis(), 1672515780000);
        assert!(candle.is_well_formed());
    }

    #[test]
    fn rejects_short_row() {
        let row = json!([1672515780000i64, "1.0"]).as_array().unwrap().clone();
        let result = kline_row_to_candle(&row, "BTCUSDT", Interval::OneMinute);
        assert!(matches!(result, Err(ProviderError::Parse(_))));
    }

    #[test]
    fn rejects_non_numeric_price() {
        let mut row = sample_row();
        row[1] = json!("not-a-number");
        let result = kline_row_to_candle(&row, "BTCUSDT", Interval::OneMinute);
        assert!(matches!(result, Err(ProviderError::Parse(_))));
    }
}
