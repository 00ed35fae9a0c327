//! Kline WebSocket consumer.
//!
//! Maintains one multiplexed subscription over every tracked
//! (instrument, interval) pair. Reconnects with exponential backoff on
//! failure; a successful connection resets the delay. Subscription set
//! changes require a full reconnect with the new combined stream list —
//! the exchange offers no incremental resubscribe that survives our
//! reconnect model.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use market_common::Interval;
use tokio::sync::{broadcast, watch};
use tokio::time::{sleep, timeout, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::config::StreamSettings;
use crate::provider::binance::{parse_stream_message, KlineMessage};
use crate::symbol::{SymbolUniverse, UniverseObserver};

use super::{CandleBatcher, StreamError};

/// Stream ingestion counters.
#[derive(Debug, Default)]
pub struct StreamCounters {
    messages_received: AtomicU64,
    parse_errors: AtomicU64,
}

impl StreamCounters {
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }
}

/// Universe observer that signals the consumer to rebuild its
/// subscription list.
pub struct StreamResubscriber {
    tx: watch::Sender<u64>,
}

impl UniverseObserver for StreamResubscriber {
    fn name(&self) -> &str {
        "stream-resubscriber"
    }

    fn on_universe_change(
        &self,
        _instruments: &[String],
        _intervals: &[Interval],
        _added: &[String],
        _removed: &[String],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.tx.send_modify(|version| *version = version.wrapping_add(1));
        Ok(())
    }
}

/// Create the resubscription signal pair: the observer to register with
/// the universe and the receiver handed to the consumer.
pub fn resubscribe_channel() -> (Arc<StreamResubscriber>, watch::Receiver<u64>) {
    let (tx, rx) = watch::channel(0);
    (Arc::new(StreamResubscriber { tx }), rx)
}

/// Build the combined multiplexed stream URL for the given universe.
/// Returns `None` when there is nothing to subscribe to.
pub fn build_stream_url(
    base: &str,
    symbols: &[String],
    intervals: &[Interval],
) -> Option<String> {
    if symbols.is_empty() || intervals.is_empty() {
        return None;
    }

    let streams: Vec<String> = symbols
        .iter()
        .flat_map(|symbol| {
            intervals
                .iter()
                .map(move |interval| format!("{}@kline_{}", symbol.to_lowercase(), interval))
        })
        .collect();

    Some(format!(
        "{}/stream?streams={}",
        base.trim_end_matches('/'),
        streams.join("/")
    ))
}

enum ConnectionEnd {
    Shutdown,
    Resubscribe,
    Closed,
}

/// Long-running kline stream consumer task.
pub struct KlineStreamConsumer {
    ws_base: String,
    read_timeout: Duration,
    ping_interval: Duration,
    initial_reconnect_delay: Duration,
    max_reconnect_delay: Duration,
    batcher: Arc<CandleBatcher>,
    universe: Arc<SymbolUniverse>,
    resubscribe: watch::Receiver<u64>,
    counters: Arc<StreamCounters>,
}

impl KlineStreamConsumer {
    pub fn new(
        settings: &StreamSettings,
        ws_base: impl Into<String>,
        batcher: Arc<CandleBatcher>,
        universe: Arc<SymbolUniverse>,
        resubscribe: watch::Receiver<u64>,
    ) -> Self {
        Self {
            ws_base: ws_base.into(),
            read_timeout: Duration::from_secs(settings.read_timeout_secs),
            ping_interval: Duration::from_secs(settings.ping_interval_secs),
            initial_reconnect_delay: Duration::from_secs(settings.initial_reconnect_delay_secs),
            max_reconnect_delay: Duration::from_secs(settings.max_reconnect_delay_secs),
            batcher,
            universe,
            resubscribe,
            counters: Arc::new(StreamCounters::default()),
        }
    }

    /// Shared ingestion counters for metrics reporting.
    pub fn counters(&self) -> Arc<StreamCounters> {
        Arc::clone(&self.counters)
    }

    /// Run until shutdown. Owns the reconnect loop.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut resubscribe = self.resubscribe.clone();
        let mut delay = self.initial_reconnect_delay;

        loop {
            // Consume any pending resubscription signal, then snapshot, so a
            // change landing after the snapshot still triggers a reconnect.
            resubscribe.borrow_and_update();
            let (symbols, intervals) = self.universe.snapshot();

            let url = match build_stream_url(&self.ws_base, &symbols, &intervals) {
                Some(url) => url,
                None => {
                    debug!("universe empty, waiting for instruments");
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        changed = resubscribe.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                    continue;
                }
            };

            info!(
                instruments = symbols.len(),
                intervals = intervals.len(),
                "connecting to kline stream"
            );

            match self
                .run_connection(&url, &mut shutdown, &mut resubscribe)
                .await
            {
                Ok(ConnectionEnd::Shutdown) => break,
                Ok(ConnectionEnd::Resubscribe) => {
                    self.batcher.reset_session().await;
                    delay = self.initial_reconnect_delay;
                    continue;
                }
                Ok(ConnectionEnd::Closed) => {
                    // The connection had been established, so the backoff
                    // restarts from the initial delay.
                    self.batcher.reset_session().await;
                    delay = self.initial_reconnect_delay;
                }
                Err(e) => {
                    warn!(error = %e, "stream connection attempt failed");
                    self.batcher.reset_session().await;
                }
            }

            warn!(delay_secs = delay.as_secs(), "reconnecting after delay");
            tokio::select! {
                _ = sleep(delay) => {
                    delay = (delay * 2).min(self.max_reconnect_delay);
                }
                _ = shutdown.recv() => break,
            }
        }

        // Final drain before the task exits.
        let outcome = self.batcher.flush().await;
        info!(
            saved = outcome.saved,
            received = self.counters.messages_received(),
            parse_errors = self.counters.parse_errors(),
            "stream consumer stopped"
        );
    }

    async fn run_connection(
        &self,
        url: &str,
        shutdown: &mut broadcast::Receiver<()>,
        resubscribe: &mut watch::Receiver<u64>,
    ) -> Result<ConnectionEnd, StreamError> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| StreamError::Connect(e.to_string()))?;
        info!("kline stream connected");

        let (mut write, mut read) = ws.split();

        let mut ping_timer = tokio::time::interval(self.ping_interval);
        ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ping_timer.tick().await; // the first tick completes immediately

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    // Flush pending work before releasing the connection.
                    self.batcher.flush().await;
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(ConnectionEnd::Shutdown);
                }
                changed = resubscribe.changed() => {
                    if changed.is_err() {
                        return Ok(ConnectionEnd::Shutdown);
                    }
                    info!("subscription set changed, reconnecting with new stream list");
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(ConnectionEnd::Resubscribe);
                }
                _ = ping_timer.tick() => {
                    if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                        warn!(error = %e, "keepalive ping failed");
                        return Ok(ConnectionEnd::Closed);
                    }
                }
                result = timeout(self.read_timeout, read.next()) => match result {
                    Err(_) => {
                        // No message within the read timeout: nudge the
                        // connection with a ping rather than reconnecting.
                        debug!("read timeout, sending keepalive ping");
                        if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                            warn!(error = %e, "keepalive ping failed");
                            return Ok(ConnectionEnd::Closed);
                        }
                    }
                    Ok(None) => {
                        info!("stream ended");
                        return Ok(ConnectionEnd::Closed);
                    }
                    Ok(Some(Ok(Message::Text(text)))) => {
                        self.handle_frame(text.as_str()).await;
                    }
                    Ok(Some(Ok(Message::Ping(payload)))) => {
                        if write.send(Message::Pong(payload)).await.is_err() {
                            return Ok(ConnectionEnd::Closed);
                        }
                    }
                    Ok(Some(Ok(Message::Close(_)))) => {
                        info!("stream closed by server");
                        return Ok(ConnectionEnd::Closed);
                    }
                    Ok(Some(Err(e))) => {
                        warn!(error = %e, "stream read error");
                        return Ok(ConnectionEnd::Closed);
                    }
                    Ok(Some(Ok(_))) => {}
                }
            }
        }
    }

    async fn handle_frame(&self, text: &str) {
        match parse_stream_message(text) {
            Ok(KlineMessage::Update(update)) => {
                self.counters.messages_received.fetch_add(1, Ordering::Relaxed);
                if let Some(outcome) = self.batcher.accept(update).await {
                    if outcome.failed > 0 {
                        warn!(failed = outcome.failed, "batch flush lost rows");
                    }
                }
            }
            Ok(KlineMessage::Control) => {
                debug!("control frame ignored");
            }
            Err(e) => {
                self.counters.parse_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "dropped malformed stream message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn builds_combined_stream_url() {
        let url = build_stream_url(
            "wss://fstream.example.com",
            &names(&["BTCUSDT", "ETHUSDT"]),
            &[Interval::OneMinute, Interval::OneHour],
        )
        .unwrap();

        assert_eq!(
            url,
            "wss://fstream.example.com/stream?streams=btcusdt@kline_1m/btcusdt@kline_1h/ethusdt@kline_1m/ethusdt@kline_1h"
        );
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let url = build_stream_url(
            "wss://fstream.example.com/",
            &names(&["BTCUSDT"]),
            &[Interval::OneMinute],
        )
        .unwrap();
        assert_eq!(
            url,
            "wss://fstream.example.com/stream?streams=btcusdt@kline_1m"
        );
    }

    #[test]
    fn empty_universe_yields_no_url() {
        assert!(build_stream_url("wss://x", &[], &[Interval::OneMinute]).is_none());
        assert!(build_stream_url("wss://x", &names(&["BTCUSDT"]), &[]).is_none());
    }

    #[test]
    fn resubscriber_bumps_version() {
        let (observer, rx) = resubscribe_channel();
        assert_eq!(*rx.borrow(), 0);

        observer
            .on_universe_change(&names(&["BTCUSDT"]), &[Interval::OneHour], &[], &[])
            .unwrap();
        assert_eq!(*rx.borrow(), 1);
    }
}
