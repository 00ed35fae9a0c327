//! Write batcher: accumulates parsed candle updates and flushes them to
//! storage on a size-or-time trigger.
//!
//! The buffer holds the last-received state per (symbol, interval,
//! open-time) key, so a closed update arriving after an in-progress one
//! for the same bucket is the only state that reaches storage in that
//! flush cycle.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use market_common::{CandleClosed, CandleUpdate, EventBus, Interval};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::BatchSettings;
use crate::storage::CandleRepository;

/// Result of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Rows written
    pub saved: usize,
    /// Rows lost to a failed transaction (all-or-nothing)
    pub failed: usize,
    /// Candle-closed events published
    pub closed_published: usize,
}

type Key = (String, Interval, DateTime<Utc>);

/// Unordered working set of not-yet-flushed updates.
pub struct BatchBuffer {
    updates: HashMap<Key, CandleUpdate>,
    last_flush: Instant,
}

impl BatchBuffer {
    pub fn new() -> Self {
        Self {
            updates: HashMap::new(),
            last_flush: Instant::now(),
        }
    }

    /// Insert an update, replacing any earlier state for the same key.
    pub fn insert(&mut self, update: CandleUpdate) {
        self.updates.insert(update.key(), update);
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Whether either flush trigger has fired.
    pub fn should_flush(&self, max_size: usize, max_age: Duration) -> bool {
        if self.updates.is_empty() {
            return false;
        }
        self.updates.len() >= max_size || self.last_flush.elapsed() >= max_age
    }

    /// Take every buffered update and reset the flush timer.
    pub fn drain(&mut self) -> Vec<CandleUpdate> {
        self.last_flush = Instant::now();
        self.updates.drain().map(|(_, update)| update).collect()
    }
}

impl Default for BatchBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Size-or-time write batcher in front of the candle repository.
pub struct CandleBatcher {
    max_size: usize,
    max_age: Duration,
    repository: CandleRepository,
    bus: EventBus,
    buffer: Mutex<BatchBuffer>,
}

impl CandleBatcher {
    pub fn new(settings: &BatchSettings, repository: CandleRepository, bus: EventBus) -> Self {
        Self {
            max_size: settings.max_size,
            max_age: Duration::from_secs(settings.max_age_secs),
            repository,
            bus,
            buffer: Mutex::new(BatchBuffer::new()),
        }
    }

    /// Accept one validated update; flush if a trigger fired.
    pub async fn accept(&self, update: CandleUpdate) -> Option<FlushOutcome> {
        let due = {
            let mut buffer = self.buffer.lock().await;
            buffer.insert(update);
            buffer.should_flush(self.max_size, self.max_age)
        };

        if due {
            Some(self.flush().await)
        } else {
            None
        }
    }

    /// Drain the buffer and write it in one transaction.
    ///
    /// A failed transaction rolls back and reports every row as failed;
    /// partial per-row failure is not distinguished. Each persisted closed
    /// candle publishes one candle-closed event.
    pub async fn flush(&self) -> FlushOutcome {
        let updates = {
            let mut buffer = self.buffer.lock().await;
            buffer.drain()
        };
        if updates.is_empty() {
            return FlushOutcome::default();
        }

        let (closed, in_progress): (Vec<CandleUpdate>, Vec<CandleUpdate>) =
            updates.into_iter().partition(|u| u.closed);

        match self.repository.upsert_batch(&closed, &in_progress).await {
            Ok(saved) => {
                let mut published = 0;
                for update in &closed {
                    self.bus.publish_candle_closed(CandleClosed {
                        symbol: update.symbol.clone(),
                        interval: update.interval,
                        open_time: update.open_time,
                        open: update.open,
                        high: update.high,
                        low: update.low,
                        close: update.close,
                        volume: update.volume,
                    });
                    published += 1;
                }
                debug!(saved, closed = published, "batch flushed");
                FlushOutcome {
                    saved,
                    failed: 0,
                    closed_published: published,
                }
            }
            Err(e) => {
                let failed = closed.len() + in_progress.len();
                warn!(failed, error = %e, "batch flush failed, rolled back");
                FlushOutcome {
                    saved: 0,
                    failed,
                    closed_published: 0,
                }
            }
        }
    }

    /// Best-effort flush on connection loss, then re-validate the storage
    /// session before the stream reconnects and the buffer is reused.
    pub async fn reset_session(&self) -> FlushOutcome {
        let outcome = self.flush().await;
        if let Err(e) = self.repository.ping().await {
            warn!(error = %e, "storage session validation failed after connection loss");
        }
        outcome
    }

    /// Number of updates currently buffered.
    pub async fn pending(&self) -> usize {
        self.buffer.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn update(symbol: &str, minute: u32, close: rust_decimal::Decimal, closed: bool) -> CandleUpdate {
        let open_time = Utc.with_ymd_and_hms(2024, 6, 1, 12, minute, 0).unwrap();
        CandleUpdate {
            symbol: symbol.to_string(),
            interval: Interval::OneMinute,
            open_time,
            close_time: open_time + chrono::Duration::seconds(59),
            open: dec!(100),
            high: dec!(110),
            low: dec!(95),
            close,
            volume: dec!(10),
            closed,
        }
    }

    #[test]
    fn keeps_last_received_state_per_key() {
        let mut buffer = BatchBuffer::new();
        buffer.insert(update("BTCUSDT", 0, dec!(101), false));
        buffer.insert(update("BTCUSDT", 0, dec!(104), true));
        assert_eq!(buffer.len(), 1);

        let drained = buffer.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].close, dec!(104));
        assert!(drained[0].closed);
    }

    #[test]
    fn distinct_keys_are_kept_apart() {
        let mut buffer = BatchBuffer::new();
        buffer.insert(update("BTCUSDT", 0, dec!(101), false));
        buffer.insert(update("BTCUSDT", 1, dec!(102), false));
        buffer.insert(update("ETHUSDT", 0, dec!(103), false));
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn inserting_the_same_update_twice_is_idempotent() {
        let mut buffer = BatchBuffer::new();
        let u = update("BTCUSDT", 0, dec!(101), false);
        buffer.insert(u.clone());
        buffer.insert(u.clone());
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.drain()[0], u);
    }

    #[test]
    fn size_trigger_fires() {
        let mut buffer = BatchBuffer::new();
        buffer.insert(update("BTCUSDT", 0, dec!(101), false));
        assert!(!buffer.should_flush(2, Duration::from_secs(60)));
        buffer.insert(update("BTCUSDT", 1, dec!(102), false));
        assert!(buffer.should_flush(2, Duration::from_secs(60)));
    }

    #[test]
    fn age_trigger_fires() {
        let mut buffer = BatchBuffer::new();
        buffer.insert(update("BTCUSDT", 0, dec!(101), false));
        buffer.last_flush = Instant::now() - Duration::from_secs(10);
        assert!(buffer.should_flush(1000, Duration::from_secs(5)));
    }

    #[test]
    fn empty_buffer_never_flushes() {
        let buffer = BatchBuffer::new();
        assert!(!buffer.should_flush(1, Duration::ZERO));
    }

    #[test]
    fn drain_resets_the_timer() {
        let mut buffer = BatchBuffer::new();
        buffer.insert(update("BTCUSDT", 0, dec!(101), false));
        buffer.last_flush = Instant::now() - Duration::from_secs(10);
        let _ = buffer.drain();

        buffer.insert(update("BTCUSDT", 1, dec!(102), false));
        assert!(!buffer.should_flush(1000, Duration::from_secs(5)));
    }
}
