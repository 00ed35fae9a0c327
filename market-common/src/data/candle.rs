//! Normalized OHLCV candle types and interval definitions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Candle interval (timeframe) supported by the ingestion pipeline.
///
/// The string form matches the exchange interval names used in both the
/// REST kline endpoint and the `@kline_<interval>` stream suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Interval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    FourHours,
    OneDay,
}

/// Error returned when parsing an unknown interval name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown interval: {0}")]
pub struct ParseIntervalError(pub String);

impl Interval {
    /// All intervals, shortest first.
    pub const ALL: [Interval; 6] = [
        Interval::OneMinute,
        Interval::FiveMinutes,
        Interval::FifteenMinutes,
        Interval::OneHour,
        Interval::FourHours,
        Interval::OneDay,
    ];

    /// Exchange interval name (e.g. `1m`, `1h`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::OneHour => "1h",
            Interval::FourHours => "4h",
            Interval::OneDay => "1d",
        }
    }

    /// Bucket duration in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            Interval::OneMinute => 60,
            Interval::FiveMinutes => 300,
            Interval::FifteenMinutes => 900,
            Interval::OneHour => 3_600,
            Interval::FourHours => 14_400,
            Interval::OneDay => 86_400,
        }
    }

    /// Parse from the exchange interval name.
    pub fn parse(s: &str) -> Result<Self, ParseIntervalError> {
        match s {
            "1m" => Ok(Interval::OneMinute),
            "5m" => Ok(Interval::FiveMinutes),
            "15m" => Ok(Interval::FifteenMinutes),
            "1h" => Ok(Interval::OneHour),
            "4h" => Ok(Interval::FourHours),
            "1d" => Ok(Interval::OneDay),
            other => Err(ParseIntervalError(other.to_string())),
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Interval {
    type Error = ParseIntervalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Interval::parse(&value)
    }
}

impl From<Interval> for String {
    fn from(value: Interval) -> Self {
        value.as_str().to_string()
    }
}

/// A finalized OHLCV bar for one instrument over one time bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Instrument symbol (e.g. `BTCUSDT`)
    pub symbol: String,
    /// Candle interval
    pub interval: Interval,
    /// Bucket open time (UTC)
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Whether the bar satisfies the basic OHLCV shape constraints:
    /// all values positive, high at least the max of open/close/low,
    /// low at most the min of open/close/high.
    pub fn is_well_formed(&self) -> bool {
        let positive = self.open > Decimal::ZERO
            && self.high > Decimal::ZERO
            && self.low > Decimal::ZERO
            && self.close > Decimal::ZERO
            && self.volume >= Decimal::ZERO;

        positive
            && self.high >= self.open.max(self.close).max(self.low)
            && self.low <= self.open.min(self.close).min(self.high)
    }
}

/// A live candle update as received from the stream.
///
/// Carries the `closed` flag distinguishing a finalized bar (full overwrite
/// on persist) from an in-progress one (high/low merge on persist).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleUpdate {
    pub symbol: String,
    pub interval: Interval,
    /// Bucket open time (UTC)
    pub open_time: DateTime<Utc>,
    /// Bucket close time (UTC)
    pub close_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// True once the exchange has finalized this bar
    pub closed: bool,
}

impl CandleUpdate {
    /// Key identifying the stored row this update targets.
    pub fn key(&self) -> (String, Interval, DateTime<Utc>) {
        (self.symbol.clone(), self.interval, self.open_time)
    }

    /// Drop the close-time and closed flag, leaving the bar itself.
    pub fn into_candle(self) -> Candle {
        Candle {
            symbol: self.symbol,
            interval: self.interval,
            open_time: self.open_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn bar(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle {
            symbol: "BTCUSDT".to_string(),
            interval: Interval::OneHour,
            open_time: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: dec!(10),
        }
    }

    #[test]
    fn interval_round_trip() {
        for interval in Interval::ALL {
            assert_eq!(Interval::parse(interval.as_str()).unwrap(), interval);
        }
        assert!(Interval::parse("3w").is_err());
    }

    #[test]
    fn interval_durations_are_increasing() {
        let mut prev = 0;
        for interval in Interval::ALL {
            assert!(interval.seconds() > prev);
            prev = interval.seconds();
        }
    }

    #[test]
    fn well_formed_bar() {
        assert!(bar(dec!(100), dec!(110), dec!(95), dec!(105)).is_well_formed());
    }

    #[test]
    fn high_below_low_is_malformed() {
        assert!(!bar(dec!(100), dec!(90), dec!(95), dec!(92)).is_well_formed());
    }

    #[test]
    fn non_positive_price_is_malformed() {
        assert!(!bar(dec!(0), dec!(110), dec!(95), dec!(105)).is_well_formed());
    }
}
