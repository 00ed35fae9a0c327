//! Database connection management, migrations, and statistics.

use chrono::{DateTime, Utc};
use market_common::Interval;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DatabaseSettings;

use super::RepositoryResult;

/// Schema migrations, applied in order at startup. Every statement is
/// idempotent so re-running is safe.
const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS symbols (
        id          SERIAL PRIMARY KEY,
        name        TEXT NOT NULL UNIQUE,
        base_asset  TEXT NOT NULL,
        quote_asset TEXT NOT NULL,
        image_url   TEXT,
        active      BOOLEAN NOT NULL DEFAULT TRUE,
        removed_at  TIMESTAMPTZ,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        CHECK (active = (removed_at IS NULL))
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS timeframes (
        id      SERIAL PRIMARY KEY,
        name    TEXT NOT NULL UNIQUE,
        seconds BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS candles (
        symbol_id    INT NOT NULL REFERENCES symbols(id) ON DELETE CASCADE,
        timeframe_id INT NOT NULL REFERENCES timeframes(id),
        open_time    TIMESTAMPTZ NOT NULL,
        open         NUMERIC NOT NULL,
        high         NUMERIC NOT NULL,
        low          NUMERIC NOT NULL,
        close        NUMERIC NOT NULL,
        volume       NUMERIC NOT NULL,
        closed       BOOLEAN NOT NULL DEFAULT FALSE,
        updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (symbol_id, timeframe_id, open_time)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_candles_open_time ON candles (open_time DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS watchlist_filters (
        symbol_name TEXT PRIMARY KEY,
        kind        TEXT NOT NULL CHECK (kind IN ('whitelist', 'blacklist')),
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS symbol_metrics (
        symbol_name TEXT PRIMARY KEY,
        market_cap  NUMERIC NOT NULL,
        volume_24h  NUMERIC NOT NULL,
        fetched_at  TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ticker_ids (
        ticker      TEXT PRIMARY KEY,
        external_id TEXT NOT NULL,
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS qualification_config (
        singleton      BOOLEAN PRIMARY KEY DEFAULT TRUE CHECK (singleton),
        min_volume_24h NUMERIC NOT NULL,
        min_market_cap NUMERIC NOT NULL,
        updated_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

/// Connection pool owner; hands out the pool to the per-table repositories.
pub struct Storage {
    pool: PgPool,
}

impl Storage {
    /// Connect to the database using the given settings.
    pub async fn connect(settings: &DatabaseSettings) -> RepositoryResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&settings.url)
            .await?;

        Ok(Self { pool })
    }

    /// Get the database pool reference
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply schema migrations and seed the timeframe reference data.
    pub async fn run_migrations(&self) -> RepositoryResult<()> {
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        for interval in Interval::ALL {
            sqlx::query(
                r#"
                INSERT INTO timeframes (name, seconds)
                VALUES ($1, $2)
                ON CONFLICT (name) DO NOTHING
                "#,
            )
            .bind(interval.as_str())
            .bind(interval.seconds())
            .execute(&self.pool)
            .await?;
        }

        info!("schema migrations applied");
        Ok(())
    }

    /// Validate connectivity with a trivial round-trip.
    pub async fn ping(&self) -> RepositoryResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        debug!("database ping ok");
        Ok(())
    }

    /// Get overall database statistics
    pub async fn stats(&self) -> RepositoryResult<DatabaseStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM candles)                      AS total_candles,
                (SELECT COUNT(*) FROM symbols)                      AS total_symbols,
                (SELECT COUNT(*) FROM symbols WHERE active = TRUE)  AS active_symbols,
                (SELECT MIN(open_time) FROM candles)                AS earliest_candle,
                (SELECT MAX(open_time) FROM candles)                AS latest_candle
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(DatabaseStats {
            total_candles: row.get::<i64, _>("total_candles") as u64,
            total_symbols: row.get::<i64, _>("total_symbols") as u64,
            active_symbols: row.get::<i64, _>("active_symbols") as u64,
            earliest_candle: row.get("earliest_candle"),
            latest_candle: row.get("latest_candle"),
        })
    }
}

/// Overall database statistics
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub total_candles: u64,
    pub total_symbols: u64,
    pub active_symbols: u64,
    pub earliest_candle: Option<DateTime<Utc>>,
    pub latest_candle: Option<DateTime<Utc>>,
}
