//! Typed in-process pub/sub bus.
//!
//! Connects the ingestion core to downstream consumers without coupling
//! them: the write batcher announces finalized candles, the lifecycle
//! manager announces universe changes, and a configuration-change topic
//! lets operators trigger an immediate watchlist re-evaluation.
//!
//! Built on `tokio::sync::broadcast`; publishing with no subscribers is
//! not an error, and slow subscribers observe `Lagged` rather than
//! blocking publishers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::data::Interval;

/// Default per-topic channel capacity.
const DEFAULT_CAPACITY: usize = 1024;

/// A candle the exchange finalized and the batcher persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleClosed {
    pub symbol: String,
    pub interval: Interval,
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// The set of actively tracked instruments changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseChanged {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Qualification thresholds or watchlist filters were edited externally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigChanged;

/// In-process event bus with one broadcast channel per topic.
#[derive(Debug, Clone)]
pub struct EventBus {
    candle_closed: broadcast::Sender<CandleClosed>,
    universe_changed: broadcast::Sender<UniverseChanged>,
    config_changed: broadcast::Sender<ConfigChanged>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (candle_closed, _) = broadcast::channel(capacity);
        let (universe_changed, _) = broadcast::channel(capacity);
        let (config_changed, _) = broadcast::channel(capacity);
        Self {
            candle_closed,
            universe_changed,
            config_changed,
        }
    }

    /// Publish a finalized-candle event. Returns the number of subscribers
    /// that received it (zero when nobody is listening).
    pub fn publish_candle_closed(&self, event: CandleClosed) -> usize {
        self.candle_closed.send(event).unwrap_or(0)
    }

    pub fn publish_universe_changed(&self, event: UniverseChanged) -> usize {
        self.universe_changed.send(event).unwrap_or(0)
    }

    pub fn publish_config_changed(&self) -> usize {
        self.config_changed.send(ConfigChanged).unwrap_or(0)
    }

    pub fn subscribe_candle_closed(&self) -> broadcast::Receiver<CandleClosed> {
        self.candle_closed.subscribe()
    }

    pub fn subscribe_universe_changed(&self) -> broadcast::Receiver<UniverseChanged> {
        self.universe_changed.subscribe()
    }

    pub fn subscribe_config_changed(&self) -> broadcast::Receiver<ConfigChanged> {
        self.config_changed.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn closed_event() -> CandleClosed {
        CandleClosed {
            symbol: "BTCUSDT".to_string(),
            interval: Interval::OneHour,
            open_time: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            open: dec!(100),
            high: dec!(110),
            low: dec!(95),
            close: dec!(105),
            volume: dec!(42),
        }
    }

    #[test]
    fn publish_without_subscribers_is_ok() {
        let bus = EventBus::new();
        assert_eq!(bus.publish_candle_closed(closed_event()), 0);
        assert_eq!(bus.publish_config_changed(), 0);
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_candle_closed();

        let sent = closed_event();
        assert_eq!(bus.publish_candle_closed(sent.clone()), 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn topics_are_independent() {
        let bus = EventBus::new();
        let mut universe_rx = bus.subscribe_universe_changed();

        bus.publish_candle_closed(closed_event());
        bus.publish_universe_changed(UniverseChanged {
            added: vec!["ETHUSDT".to_string()],
            removed: vec![],
        });

        let event = universe_rx.recv().await.unwrap();
        assert_eq!(event.added, vec!["ETHUSDT".to_string()]);
    }
}
