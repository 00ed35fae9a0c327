//! Enrichment API wire types.

use rust_decimal::Decimal;
use serde::Deserialize;

/// One market entry from the markets endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct CoinMarket {
    /// Provider-assigned coin id (e.g. `bitcoin`)
    pub id: String,
    /// Base asset ticker, lower-cased by the provider (e.g. `btc`)
    pub symbol: String,
    pub name: String,
    /// Image URL for the asset
    #[serde(default)]
    pub image: Option<String>,
    /// Market capitalization in the vs currency
    #[serde(default)]
    pub market_cap: Option<f64>,
    /// 24h traded volume in the vs currency
    #[serde(default)]
    pub total_volume: Option<f64>,
}

impl CoinMarket {
    /// Market cap as a decimal, zero when the provider omits it.
    pub fn market_cap_decimal(&self) -> Decimal {
        self.market_cap
            .and_then(Decimal::from_f64_retain)
            .unwrap_or(Decimal::ZERO)
    }

    /// 24h volume as a decimal, zero when the provider omits it.
    pub fn volume_decimal(&self) -> Decimal {
        self.total_volume
            .and_then(Decimal::from_f64_retain)
            .unwrap_or(Decimal::ZERO)
    }
}

/// Free-text search response.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub coins: Vec<SearchCoin>,
}

/// One coin entry from the search endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchCoin {
    pub id: String,
    /// Base asset ticker, upper-cased by the provider
    pub symbol: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parse_market_entry() {
        let json = r#"{
            "id": "bitcoin",
            "symbol": "btc",
            "name": "Bitcoin",
            "image": "https://assets.example/btc.png",
            "market_cap": 900000000000.0,
            "total_volume": 25000000000.0
        }"#;

        let market: CoinMarket = serde_json::from_str(json).unwrap();
        assert_eq!(market.id, "bitcoin");
        assert_eq!(market.market_cap_decimal(), dec!(900000000000));
        assert_eq!(market.volume_decimal(), dec!(25000000000));
    }

    #[test]
    fn missing_metrics_default_to_zero() {
        let json = r#"{"id": "obscurecoin", "symbol": "obs", "name": "Obscure"}"#;
        let market: CoinMarket = serde_json::from_str(json).unwrap();
        assert_eq!(market.market_cap_decimal(), Decimal::ZERO);
        assert_eq!(market.volume_decimal(), Decimal::ZERO);
    }
}
