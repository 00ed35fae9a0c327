//! Normalizes raw stream messages into canonical candle updates.
//!
//! A rejected message is counted by the caller and dropped; it never
//! crashes the read loop.

use std::str::FromStr;

use chrono::{TimeZone, Utc};
use market_common::{CandleUpdate, Interval};
use rust_decimal::Decimal;

use super::types::{KlineEvent, StreamEnvelope};

/// Outcome of parsing one stream frame.
#[derive(Debug)]
pub enum KlineMessage {
    /// A kline update, validated and normalized
    Update(CandleUpdate),
    /// Subscription confirmation or other control frame
    Control,
}

/// Parse failure for one stream frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KlineParseError {
    #[error("malformed message: {0}")]
    Json(String),

    #[error("invalid kline: {0}")]
    Invalid(String),
}

/// Parse one text frame from the stream.
///
/// Accepts both the combined-stream envelope (`{stream, data}`) and the
/// bare event form; subscription acks (`{result, id}`) are identified as
/// control frames.
pub fn parse_stream_message(text: &str) -> Result<KlineMessage, KlineParseError> {
    if let Ok(envelope) = serde_json::from_str::<StreamEnvelope>(text) {
        return normalize(envelope.data).map(KlineMessage::Update);
    }

    if let Ok(event) = serde_json::from_str::<KlineEvent>(text) {
        return normalize(event).map(KlineMessage::Update);
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
        if value.get("result").is_some() || value.get("id").is_some() {
            return Ok(KlineMessage::Control);
        }
    }

    Err(KlineParseError::Json(format!(
        "unable to parse message: {}",
        text
    )))
}

/// Validate and convert a kline event into a canonical update.
fn normalize(event: KlineEvent) -> Result<CandleUpdate, KlineParseError> {
    let k = &event.kline;

    if k.open_time <= 0 {
        return Err(KlineParseError::Invalid("missing open timestamp".into()));
    }
    let open_time = Utc
        .timestamp_millis_opt(k.open_time)
        .single()
        .ok_or_else(|| KlineParseError::Invalid(format!("invalid open time: {}", k.open_time)))?;
    let close_time = Utc
        .timestamp_millis_opt(k.close_time)
        .single()
        .unwrap_or(open_time);

    let interval = Interval::parse(&k.interval)
        .map_err(|e| KlineParseError::Invalid(e.to_string()))?;

    let decimal = |raw: &str, name: &str| -> Result<Decimal, KlineParseError> {
        Decimal::from_str(raw)
            .map_err(|e| KlineParseError::Invalid(format!("bad {} '{}': {}", name, raw, e)))
    };

    let open = decimal(&k.open, "open")?;
    let high = decimal(&k.high, "high")?;
    let low = decimal(&k.low, "low")?;
    let close = decimal(&k.close, "close")?;
    let volume = decimal(&k.volume, "volume")?;

    for (value, name) in [
        (open, "open"),
        (high, "high"),
        (low, "low"),
        (close, "close"),
        (volume, "volume"),
    ] {
        if value <= Decimal::ZERO {
            return Err(KlineParseError::Invalid(format!(
                "non-positive {}: {}",
                name, value
            )));
        }
    }

    if high < low {
        return Err(KlineParseError::Invalid(format!(
            "high {} below low {}",
            high, low
        )));
    }

    Ok(CandleUpdate {
        symbol: event.symbol,
        interval,
        open_time,
        close_time,
        open,
        high,
        low,
        close,
        volume,
        closed: k.closed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn kline_json(open: &str, high: &str, low: &str, close: &str, volume: &str) -> String {
        format!(
            r#"{{
                "stream": "btcusdt@kline_1m",
                "data": {{
                    "e": "kline",
                    "s": "BTCUSDT",
                    "k": {{
                        "t": 1672515780000,
                        "T": 1672515839999,
                        "i": "1m",
                        "o": "{open}",
                        "h": "{high}",
                        "l": "{low}",
                        "c": "{close}",
                        "v": "{volume}",
                        "x": true
                    }}
                }}
            }}"#
        )
    }

    #[test]
    fn valid_message_normalizes() {
        let text = kline_json("100", "110", "95", "105", "12.5");
        let message = parse_stream_message(&text).unwrap();
        match message {
            KlineMessage::Update(update) => {
                assert_eq!(update.symbol, "BTCUSDT");
                assert_eq!(update.interval, Interval::OneMinute);
                assert_eq!(update.high, dec!(110));
                assert_eq!(update.low, dec!(95));
                assert!(update.closed);
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn high_below_low_is_rejected() {
        let text = kline_json("100", "90", "95", "92", "12.5");
        let result = parse_stream_message(&text);
        assert!(matches!(result, Err(KlineParseError::Invalid(_))));
    }

    #[test]
    fn non_positive_value_is_rejected() {
        let text = kline_json("100", "110", "95", "0", "12.5");
        assert!(matches!(
            parse_stream_message(&text),
            Err(KlineParseError::Invalid(_))
        ));

        let text = kline_json("100", "110", "95", "105", "-1");
        assert!(matches!(
            parse_stream_message(&text),
            Err(KlineParseError::Invalid(_))
        ));
    }

    #[test]
    fn missing_open_timestamp_is_rejected() {
        let text = r#"{
            "e": "kline",
            "s": "BTCUSDT",
            "k": {
                "t": 0,
                "T": 1672515839999,
                "i": "1m",
                "o": "100", "h": "110", "l": "95", "c": "105", "v": "1",
                "x": false
            }
        }"#;
        assert!(matches!(
            parse_stream_message(text),
            Err(KlineParseError::Invalid(_))
        ));
    }

    #[test]
    fn unknown_interval_is_rejected() {
        let text = r#"{
            "e": "kline",
            "s": "BTCUSDT",
            "k": {
                "t": 1672515780000,
                "T": 1672515839999,
                "i": "7m",
                "o": "100", "h": "110", "l": "95", "c": "105", "v": "1",
                "x": false
            }
        }"#;
        assert!(matches!(
            parse_stream_message(text),
            Err(KlineParseError::Invalid(_))
        ));
    }

    #[test]
    fn subscription_ack_is_control() {
        let result = parse_stream_message(r#"{"result": null, "id": 1}"#).unwrap();
        assert!(matches!(result, KlineMessage::Control));
    }

    #[test]
    fn garbage_is_a_json_error() {
        assert!(matches!(
            parse_stream_message("not json"),
            Err(KlineParseError::Json(_))
        ));
    }
}
