//! Backfill reconciler.
//!
//! Re-fetches a recent candle window per (symbol, interval), diffs it
//! against storage, and repairs gaps or corrections the live stream
//! missed. The diff is a pure function over the fetched window and the
//! stored rows; the commit is a single atomic transaction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use market_common::{Candle, Interval};
use rust_decimal::Decimal;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::BackfillSettings;
use crate::provider::binance::BinanceRestClient;
use crate::resilience::RetryPolicy;
use crate::storage::CandleRepository;

/// Relative tolerance absorbing floating-point noise between the stream
/// and REST representations of the same candle: 1e-6.
fn default_tolerance() -> Decimal {
    Decimal::new(1, 6)
}

/// Trim a freshly fetched window (ascending by open time) to the portion
/// safe to reconcile.
///
/// The most recent element may still be open, so it is excluded. A window
/// of one is treated as empty — a single returned candle cannot be told
/// apart from an open one, so nothing is reconciled.
pub fn reconcile_window(mut fetched: Vec<Candle>) -> Vec<Candle> {
    if fetched.len() <= 1 {
        return Vec::new();
    }
    fetched.sort_by_key(|c| c.open_time);
    fetched.pop();
    fetched
}

/// Relative comparison: |a - b| <= tolerance * max(|a|, |b|, 1).
pub fn within_tolerance(a: Decimal, b: Decimal, tolerance: Decimal) -> bool {
    let scale = a.abs().max(b.abs()).max(Decimal::ONE);
    (a - b).abs() <= tolerance * scale
}

/// Whether two candles for the same bucket agree within tolerance on all
/// OHLCV fields.
pub fn candles_match(a: &Candle, b: &Candle, tolerance: Decimal) -> bool {
    within_tolerance(a.open, b.open, tolerance)
        && within_tolerance(a.high, b.high, tolerance)
        && within_tolerance(a.low, b.low, tolerance)
        && within_tolerance(a.close, b.close, tolerance)
        && within_tolerance(a.volume, b.volume, tolerance)
}

/// Planned repairs for one (symbol, interval) window.
#[derive(Debug, Default)]
pub struct ReconciliationPlan {
    /// Candles absent from storage
    pub inserts: Vec<Candle>,
    /// Candles present but diverging beyond tolerance
    pub updates: Vec<Candle>,
    /// Candles present and matching
    pub matched: usize,
}

impl ReconciliationPlan {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty()
    }
}

/// Diff the trimmed window against the stored rows.
pub fn plan_reconciliation(
    window: &[Candle],
    stored: &[Candle],
    tolerance: Decimal,
) -> ReconciliationPlan {
    let stored_by_time: HashMap<DateTime<Utc>, &Candle> =
        stored.iter().map(|c| (c.open_time, c)).collect();

    let mut plan = ReconciliationPlan::default();
    for candle in window {
        match stored_by_time.get(&candle.open_time) {
            None => plan.inserts.push(candle.clone()),
            Some(existing) if !candles_match(candle, existing, tolerance) => {
                plan.updates.push(candle.clone())
            }
            Some(_) => plan.matched += 1,
        }
    }
    plan
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub symbol: String,
    pub interval: Interval,
    pub inserted: usize,
    pub updated: usize,
    pub errors: usize,
}

impl ReconcileOutcome {
    fn zero(symbol: &str, interval: Interval) -> Self {
        Self {
            symbol: symbol.to_string(),
            interval,
            inserted: 0,
            updated: 0,
            errors: 0,
        }
    }

    fn failed(symbol: &str, interval: Interval) -> Self {
        Self {
            errors: 1,
            ..Self::zero(symbol, interval)
        }
    }
}

/// Aggregate result of a full-universe sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepSummary {
    pub pairs: usize,
    pub inserted: usize,
    pub updated: usize,
    pub errors: usize,
}

/// Gap detector / backfill reconciler.
pub struct BackfillReconciler {
    client: Arc<BinanceRestClient>,
    candles: CandleRepository,
    window_limit: u32,
    tolerance: Decimal,
    retry: RetryPolicy,
    concurrency: usize,
}

impl BackfillReconciler {
    pub fn new(
        settings: &BackfillSettings,
        client: Arc<BinanceRestClient>,
        candles: CandleRepository,
    ) -> Self {
        Self {
            client,
            candles,
            window_limit: settings.window_limit,
            tolerance: default_tolerance(),
            retry: RetryPolicy {
                max_retries: settings.max_retries,
                base_delay: Duration::from_secs(settings.base_delay_secs),
                rate_limit_delay: Duration::from_secs(settings.rate_limit_delay_secs),
                max_delay: Duration::from_secs(300),
            },
            concurrency: settings.concurrency.max(1),
        }
    }

    /// Reconcile one (symbol, interval) pair.
    ///
    /// Transient fetch failures retry with escalating backoff (rate limits
    /// back off harder). Exhausted retries and failed commits report zero
    /// changes; a commit is all-or-nothing so no partial credit is ever
    /// claimed.
    pub async fn reconcile(&self, symbol: &str, interval: Interval) -> ReconcileOutcome {
        let fetched = match self
            .retry
            .run("kline window fetch", || {
                self.client
                    .klines(symbol, interval, self.window_limit, None, None)
            })
            .await
        {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(symbol, interval = %interval, error = %e, "window fetch failed");
                return ReconcileOutcome::failed(symbol, interval);
            }
        };

        let window = reconcile_window(fetched);
        if window.is_empty() {
            debug!(symbol, interval = %interval, "window empty, nothing to reconcile");
            return ReconcileOutcome::zero(symbol, interval);
        }

        let open_times: Vec<DateTime<Utc>> = window.iter().map(|c| c.open_time).collect();
        let stored = match self
            .candles
            .fetch_by_open_times(symbol, interval, &open_times)
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                warn!(symbol, interval = %interval, error = %e, "stored window load failed");
                return ReconcileOutcome::failed(symbol, interval);
            }
        };

        let plan = plan_reconciliation(&window, &stored, self.tolerance);
        if plan.is_empty() {
            debug!(
                symbol,
                interval = %interval,
                matched = plan.matched,
                "window consistent"
            );
            return ReconcileOutcome::zero(symbol, interval);
        }

        match self
            .candles
            .commit_reconciliation(&plan.inserts, &plan.updates)
            .await
        {
            Ok((inserted, updated)) => {
                info!(symbol, interval = %interval, inserted, updated, "window repaired");
                ReconcileOutcome {
                    symbol: symbol.to_string(),
                    interval,
                    inserted,
                    updated,
                    errors: 0,
                }
            }
            Err(e) => {
                warn!(
                    symbol,
                    interval = %interval,
                    error = %e,
                    "reconciliation commit failed, reporting zero changes"
                );
                ReconcileOutcome::failed(symbol, interval)
            }
        }
    }

    /// Reconcile every pair under a bounded concurrency limit (a semaphore
    /// of fixed width) so the sweep cannot overwhelm the rate limiter.
    /// Per-pair failures never abort sibling pairs.
    pub async fn sweep(&self, pairs: Vec<(String, Interval)>) -> SweepSummary {
        let mut summary = SweepSummary {
            pairs: pairs.len(),
            ..SweepSummary::default()
        };

        let semaphore = Semaphore::new(self.concurrency);
        let outcomes = join_all(pairs.iter().map(|(symbol, interval)| {
            let semaphore = &semaphore;
            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return ReconcileOutcome::failed(symbol, *interval);
                };
                self.reconcile(symbol, *interval).await
            }
        }))
        .await;

        for outcome in outcomes {
            summary.inserted += outcome.inserted;
            summary.updated += outcome.updated;
            summary.errors += outcome.errors;
        }

        info!(
            pairs = summary.pairs,
            inserted = summary.inserted,
            updated = summary.updated,
            errors = summary.errors,
            "gap-detection sweep complete"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn candle(hour: u32, close: Decimal) -> Candle {
        Candle {
            symbol: "BTCUSDT".to_string(),
            interval: Interval::OneHour,
            open_time: Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap(),
            open: dec!(100),
            high: dec!(110),
            low: dec!(95),
            close,
            volume: dec!(10),
        }
    }

    #[test]
    fn window_excludes_latest_candle() {
        let fetched = vec![candle(0, dec!(100)), candle(1, dec!(101)), candle(2, dec!(102))];
        let window = reconcile_window(fetched);
        assert_eq!(window.len(), 2);
        assert_eq!(window.last().unwrap().open_time.format("%H").to_string(), "01");
    }

    #[test]
    fn single_candle_window_is_empty() {
        assert!(reconcile_window(vec![candle(0, dec!(100))]).is_empty());
        assert!(reconcile_window(Vec::new()).is_empty());
    }

    #[test]
    fn tolerance_absorbs_floating_point_noise() {
        let tolerance = default_tolerance();
        assert!(within_tolerance(dec!(100.0000001), dec!(100), tolerance));
        assert!(!within_tolerance(dec!(100.5), dec!(100), tolerance));
        // Scale-relative: a 50-unit gap on a large price is within 1e-6.
        assert!(within_tolerance(dec!(100000000), dec!(100000050), tolerance));
    }

    #[test]
    fn plans_the_five_candle_example() {
        // Five fetched; the latest is excluded as possibly open. Of the
        // remaining four: two match, one diverges, one is missing.
        let fetched = vec![
            candle(0, dec!(100)),
            candle(1, dec!(101)),
            candle(2, dec!(102)),
            candle(3, dec!(103)),
            candle(4, dec!(104)),
        ];
        let stored = vec![
            candle(0, dec!(100)),
            candle(1, dec!(101)),
            candle(2, dec!(999)), // diverged
                                  // hour 3 missing
        ];

        let window = reconcile_window(fetched);
        let plan = plan_reconciliation(&window, &stored, default_tolerance());

        assert_eq!(plan.inserts.len(), 1);
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.matched, 2);
        assert_eq!(plan.updates[0].close, dec!(102));
    }

    #[test]
    fn reconciliation_is_idempotent() {
        let fetched = vec![
            candle(0, dec!(100)),
            candle(1, dec!(101)),
            candle(2, dec!(102)),
        ];
        let stored = vec![candle(0, dec!(100))];

        let window = reconcile_window(fetched.clone());
        let first = plan_reconciliation(&window, &stored, default_tolerance());
        assert!(!first.is_empty());

        // Apply the plan, then re-run with no new upstream data.
        let mut repaired = stored;
        repaired.extend(first.inserts.iter().cloned());
        for update in &first.updates {
            if let Some(row) = repaired.iter_mut().find(|c| c.open_time == update.open_time) {
                *row = update.clone();
            }
        }

        let second = plan_reconciliation(&window, &repaired, default_tolerance());
        assert!(second.is_empty());
        assert_eq!(second.matched, window.len());
    }

    #[test]
    fn unsorted_fetch_is_ordered_before_trimming() {
        let fetched = vec![candle(2, dec!(102)), candle(0, dec!(100)), candle(1, dec!(101))];
        let window = reconcile_window(fetched);
        // The true latest (hour 2) is the one excluded.
        assert_eq!(window.len(), 2);
        assert!(window.iter().all(|c| c.close != dec!(102)));
    }
}
