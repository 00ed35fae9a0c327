//! Candle persistence: batched upserts with closed/in-progress semantics
//! and the reconciliation commit used by the backfill path.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use market_common::{Candle, CandleUpdate, Interval};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;

use super::RepositoryResult;

/// Quote assets recognized when deriving base/quote from a bare symbol
/// name, longest first so `USDT` wins over `BTC` in `XBTCUSDT`-style names.
const KNOWN_QUOTES: &[&str] = &["USDT", "USDC", "BUSD", "BTC", "ETH", "BNB"];

/// Derive (base, quote) from an exchange symbol name like `BTCUSDT`.
/// Falls back to the whole name as base when no known quote suffix matches.
pub(crate) fn split_symbol(name: &str) -> (String, String) {
    for quote in KNOWN_QUOTES {
        if name.len() > quote.len() {
            if let Some(base) = name.strip_suffix(quote) {
                return (base.to_string(), quote.to_string());
            }
        }
    }
    (name.to_string(), String::new())
}

/// Candle repository
#[derive(Clone)]
pub struct CandleRepository {
    pool: PgPool,
}

impl CandleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist one batch of stream updates in a single transaction.
    ///
    /// Closed updates overwrite the stored row and mark it terminal;
    /// in-progress updates merge (high = max, low = min, close/volume
    /// replaced) and never touch a row that has already closed.
    ///
    /// Symbol and timeframe identifiers are resolved once per distinct
    /// pair within the flush. A failure rolls the whole batch back.
    pub async fn upsert_batch(
        &self,
        closed: &[CandleUpdate],
        in_progress: &[CandleUpdate],
    ) -> RepositoryResult<usize> {
        if closed.is_empty() && in_progress.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut ids: HashMap<(String, Interval), (i32, i32)> = HashMap::new();

        for update in closed {
            let (symbol_id, timeframe_id) =
                resolve_ids(&mut tx, &mut ids, &update.symbol, update.interval).await?;
            sqlx::query(
                r#"
                INSERT INTO candles (symbol_id, timeframe_id, open_time,
                                     open, high, low, close, volume, closed, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, NOW())
                ON CONFLICT (symbol_id, timeframe_id, open_time) DO UPDATE
                SET open = EXCLUDED.open,
                    high = EXCLUDED.high,
                    low = EXCLUDED.low,
                    close = EXCLUDED.close,
                    volume = EXCLUDED.volume,
                    closed = TRUE,
                    updated_at = NOW()
                "#,
            )
            .bind(symbol_id)
            .bind(timeframe_id)
            .bind(update.open_time)
            .bind(update.open)
            .bind(update.high)
            .bind(update.low)
            .bind(update.close)
            .bind(update.volume)
            .execute(&mut *tx)
            .await?;
        }

        for update in in_progress {
            let (symbol_id, timeframe_id) =
                resolve_ids(&mut tx, &mut ids, &update.symbol, update.interval).await?;
            // The closed = FALSE guard keeps finalized rows terminal even if
            // a stale in-progress update arrives in a later batch.
            sqlx::query(
                r#"
                INSERT INTO candles (symbol_id, timeframe_id, open_time,
                                     open, high, low, close, volume, closed, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, NOW())
                ON CONFLICT (symbol_id, timeframe_id, open_time) DO UPDATE
                SET high = GREATEST(candles.high, EXCLUDED.high),
                    low = LEAST(candles.low, EXCLUDED.low),
                    close = EXCLUDED.close,
                    volume = EXCLUDED.volume,
                    updated_at = NOW()
                WHERE candles.closed = FALSE
                "#,
            )
            .bind(symbol_id)
            .bind(timeframe_id)
            .bind(update.open_time)
            .bind(update.open)
            .bind(update.high)
            .bind(update.low)
            .bind(update.close)
            .bind(update.volume)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let total = closed.len() + in_progress.len();
        debug!(
            closed = closed.len(),
            in_progress = in_progress.len(),
            "flushed candle batch"
        );
        Ok(total)
    }

    /// Validate the storage session with a trivial round-trip.
    pub async fn ping(&self) -> RepositoryResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Load stored candles for an explicit set of open times.
    pub async fn fetch_by_open_times(
        &self,
        symbol: &str,
        interval: Interval,
        open_times: &[DateTime<Utc>],
    ) -> RepositoryResult<Vec<Candle>> {
        if open_times.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT c.open_time, c.open, c.high, c.low, c.close, c.volume
            FROM candles c
            JOIN symbols s ON s.id = c.symbol_id
            JOIN timeframes t ON t.id = c.timeframe_id
            WHERE s.name = $1
              AND t.name = $2
              AND c.open_time = ANY($3)
            ORDER BY c.open_time ASC
            "#,
        )
        .bind(symbol)
        .bind(interval.as_str())
        .bind(open_times)
        .fetch_all(&self.pool)
        .await?;

        let candles = rows
            .iter()
            .map(|row| Candle {
                symbol: symbol.to_string(),
                interval,
                open_time: row.get("open_time"),
                open: row.get("open"),
                high: row.get("high"),
                low: row.get("low"),
                close: row.get("close"),
                volume: row.get("volume"),
            })
            .collect();

        Ok(candles)
    }

    /// Commit a reconciliation plan (inserts + corrections) atomically.
    ///
    /// Reconciled rows come from finalized REST history, so they are
    /// written with full-overwrite closed semantics. Returns the
    /// (inserted, updated) counts only after the commit succeeds.
    pub async fn commit_reconciliation(
        &self,
        inserts: &[Candle],
        updates: &[Candle],
    ) -> RepositoryResult<(usize, usize)> {
        if inserts.is_empty() && updates.is_empty() {
            return Ok((0, 0));
        }

        let mut tx = self.pool.begin().await?;
        let mut ids: HashMap<(String, Interval), (i32, i32)> = HashMap::new();

        for candle in inserts.iter().chain(updates.iter()) {
            let (symbol_id, timeframe_id) =
                resolve_ids(&mut tx, &mut ids, &candle.symbol, candle.interval).await?;
            sqlx::query(
                r#"
                INSERT INTO candles (symbol_id, timeframe_id, open_time,
                                     open, high, low, close, volume, closed, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, NOW())
                ON CONFLICT (symbol_id, timeframe_id, open_time) DO UPDATE
                SET open = EXCLUDED.open,
                    high = EXCLUDED.high,
                    low = EXCLUDED.low,
                    close = EXCLUDED.close,
                    volume = EXCLUDED.volume,
                    closed = TRUE,
                    updated_at = NOW()
                "#,
            )
            .bind(symbol_id)
            .bind(timeframe_id)
            .bind(candle.open_time)
            .bind(candle.open)
            .bind(candle.high)
            .bind(candle.low)
            .bind(candle.close)
            .bind(candle.volume)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok((inserts.len(), updates.len()))
    }
}

/// Resolve (symbol_id, timeframe_id), creating rows on first sighting and
/// caching within the current transaction.
async fn resolve_ids(
    tx: &mut Transaction<'_, Postgres>,
    cache: &mut HashMap<(String, Interval), (i32, i32)>,
    symbol: &str,
    interval: Interval,
) -> RepositoryResult<(i32, i32)> {
    let key = (symbol.to_string(), interval);
    if let Some(&ids) = cache.get(&key) {
        return Ok(ids);
    }

    let (base, quote) = split_symbol(symbol);
    let symbol_row = sqlx::query(
        r#"
        INSERT INTO symbols (name, base_asset, quote_asset)
        VALUES ($1, $2, $3)
        ON CONFLICT (name) DO UPDATE SET updated_at = NOW()
        RETURNING id
        "#,
    )
    .bind(symbol)
    .bind(&base)
    .bind(&quote)
    .fetch_one(&mut **tx)
    .await?;
    let symbol_id: i32 = symbol_row.get("id");

    let timeframe_row = sqlx::query(
        r#"
        INSERT INTO timeframes (name, seconds)
        VALUES ($1, $2)
        ON CONFLICT (name) DO UPDATE SET seconds = EXCLUDED.seconds
        RETURNING id
        "#,
    )
    .bind(interval.as_str())
    .bind(interval.seconds())
    .fetch_one(&mut **tx)
    .await?;
    let timeframe_id: i32 = timeframe_row.get("id");

    cache.insert(key, (symbol_id, timeframe_id));
    Ok((symbol_id, timeframe_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_usdt_pair() {
        assert_eq!(split_symbol("BTCUSDT"), ("BTC".into(), "USDT".into()));
        assert_eq!(split_symbol("ALPHAUSDT"), ("ALPHA".into(), "USDT".into()));
    }

    #[test]
    fn splits_coin_quoted_pair() {
        assert_eq!(split_symbol("ETHBTC"), ("ETH".into(), "BTC".into()));
    }

    #[test]
    fn unknown_quote_falls_back_to_whole_name() {
        assert_eq!(split_symbol("WEIRD"), ("WEIRD".into(), "".into()));
    }

    #[test]
    fn quote_only_name_is_not_emptied() {
        // A name equal to a known quote must keep a non-empty base.
        assert_eq!(split_symbol("USDT"), ("USDT".into(), "".into()));
    }
}
