//! Exchange wire types.
//!
//! Types for deserializing REST responses and WebSocket kline messages.
//! Numeric fields arrive as strings and are parsed during normalization.

use serde::Deserialize;

/// 24h rolling ticker statistics for one contract.
#[derive(Debug, Clone, Deserialize)]
pub struct Ticker24h {
    /// Symbol
    #[serde(rename = "symbol")]
    pub symbol: String,

    /// Last traded price
    #[serde(rename = "lastPrice")]
    pub last_price: String,

    /// 24h traded volume in the quote asset
    #[serde(rename = "quoteVolume")]
    pub quote_volume: String,

    /// 24h price change percent
    #[serde(rename = "priceChangePercent", default)]
    pub price_change_percent: String,
}

/// Exchange metadata response.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<ExchangeInfoSymbol>,
}

/// One contract entry from the exchange metadata endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfoSymbol {
    pub symbol: String,

    /// Trading status (`TRADING` for live contracts)
    pub status: String,

    /// Contract type (`PERPETUAL` for perpetual futures)
    #[serde(rename = "contractType", default)]
    pub contract_type: String,

    #[serde(rename = "baseAsset")]
    pub base_asset: String,

    #[serde(rename = "quoteAsset")]
    pub quote_asset: String,
}

/// WebSocket combined-stream envelope: `{"stream": "...", "data": {...}}`.
#[derive(Debug, Deserialize)]
pub struct StreamEnvelope {
    #[allow(dead_code)]
    pub stream: String,
    pub data: KlineEvent,
}

/// Kline event: `{"e": "kline", "s": "BTCUSDT", "k": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct KlineEvent {
    /// Event type
    #[serde(rename = "e", default)]
    pub event_type: String,

    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// Kline payload
    #[serde(rename = "k")]
    pub kline: KlinePayload,
}

/// The kline payload inside a stream event.
#[derive(Debug, Clone, Deserialize)]
pub struct KlinePayload {
    /// Bucket open time (epoch ms)
    #[serde(rename = "t")]
    pub open_time: i64,

    /// Bucket close time (epoch ms)
    #[serde(rename = "T")]
    pub close_time: i64,

    /// Interval name (e.g. `1m`)
    #[serde(rename = "i")]
    pub interval: String,

    #[serde(rename = "o")]
    pub open: String,

    #[serde(rename = "h")]
    pub high: String,

    #[serde(rename = "l")]
    pub low: String,

    #[serde(rename = "c")]
    pub close: String,

    #[serde(rename = "v")]
    pub volume: String,

    /// Whether this bucket is finalized
    #[serde(rename = "x")]
    pub closed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_combined_stream_kline() {
        let json = r#"{
            "stream": "btcusdt@kline_1m",
            "data": {
                "e": "kline",
                "E": 1672515782136,
                "s": "BTCUSDT",
                "k": {
                    "t": 1672515780000,
                    "T": 1672515839999,
                    "s": "BTCUSDT",
                    "i": "1m",
                    "o": "16500.10",
                    "h": "16505.00",
                    "l": "16499.00",
                    "c": "16503.40",
                    "v": "12.5",
                    "x": false
                }
            }
        }"#;

        let msg: StreamEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(msg.data.symbol, "BTCUSDT");
        assert_eq!(msg.data.kline.interval, "1m");
        assert_eq!(msg.data.kline.open, "16500.10");
        assert!(!msg.data.kline.closed);
    }

    #[test]
    fn parse_bare_kline_event() {
        let json = r#"{
            "e": "kline",
            "E": 1672515782136,
            "s": "ETHUSDT",
            "k": {
                "t": 1672515780000,
                "T": 1672515839999,
                "i": "1h",
                "o": "1200.0",
                "h": "1210.0",
                "l": "1195.0",
                "c": "1205.0",
                "v": "99.0",
                "x": true
            }
        }"#;

        let msg: KlineEvent = serde_json::from_str(json).unwrap();
        assert_eq!(msg.symbol, "ETHUSDT");
        assert!(msg.kline.closed);
    }

    #[test]
    fn parse_ticker() {
        let json = r#"{
            "symbol": "BTCUSDT",
            "lastPrice": "16503.40",
            "quoteVolume": "80500000.12",
            "priceChangePercent": "1.2"
        }"#;

        let ticker: Ticker24h = serde_json::from_str(json).unwrap();
        assert_eq!(ticker.symbol, "BTCUSDT");
        assert_eq!(ticker.quote_volume, "80500000.12");
    }
}
