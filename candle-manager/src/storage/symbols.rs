//! Symbol registry table: creation, soft-delete transitions, and the
//! retention purge.
//!
//! The lifecycle manager is the sole writer of `active`/`removed_at`;
//! ingestion paths only create rows or fill a missing image reference.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::{debug, info};

use super::RepositoryResult;

/// A symbol row from the registry.
#[derive(Debug, Clone, FromRow)]
pub struct SymbolRecord {
    pub id: i32,
    pub name: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub image_url: Option<String>,
    pub active: bool,
    pub removed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of a retention purge run.
#[derive(Debug, Clone, Default)]
pub struct PurgeReport {
    /// Symbols selected for deletion
    pub symbols: Vec<String>,
    /// Candle rows removed (or that would be removed in dry-run)
    pub candles: u64,
    /// Whether the run only reported without mutating
    pub dry_run: bool,
}

/// Symbol registry repository
#[derive(Clone)]
pub struct SymbolRepository {
    pool: PgPool,
}

impl SymbolRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a symbol on first sighting, filling a missing image reference
    /// on conflict. Never touches `active`/`removed_at`.
    pub async fn ensure(
        &self,
        name: &str,
        base_asset: &str,
        quote_asset: &str,
        image_url: Option<&str>,
    ) -> RepositoryResult<i32> {
        let row = sqlx::query(
            r#"
            INSERT INTO symbols (name, base_asset, quote_asset, image_url)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO UPDATE
            SET image_url = COALESCE(symbols.image_url, EXCLUDED.image_url),
                updated_at = NOW()
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(base_asset)
        .bind(quote_asset)
        .bind(image_url)
        .fetch_one(&self.pool)
        .await?;

        let id: i32 = row.get("id");
        debug!(symbol = name, id, "ensured symbol row");
        Ok(id)
    }

    /// Get a symbol by name
    pub async fn get(&self, name: &str) -> RepositoryResult<Option<SymbolRecord>> {
        let record = sqlx::query_as::<_, SymbolRecord>(
            r#"
            SELECT id, name, base_asset, quote_asset, image_url,
                   active, removed_at, created_at, updated_at
            FROM symbols
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// List all symbols
    pub async fn list(&self) -> RepositoryResult<Vec<SymbolRecord>> {
        let records = sqlx::query_as::<_, SymbolRecord>(
            r#"
            SELECT id, name, base_asset, quote_asset, image_url,
                   active, removed_at, created_at, updated_at
            FROM symbols
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Names of all currently active symbols
    pub async fn list_active(&self) -> RepositoryResult<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM symbols WHERE active = TRUE ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("name")).collect())
    }

    /// Names of all currently inactive symbols
    pub async fn list_inactive(&self) -> RepositoryResult<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM symbols WHERE active = FALSE ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("name")).collect())
    }

    /// Activate currently-inactive symbols. No-ops count as zero.
    pub async fn activate(&self, names: &[String]) -> RepositoryResult<u64> {
        if names.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE symbols
            SET active = TRUE, removed_at = NULL, updated_at = NOW()
            WHERE name = ANY($1) AND active = FALSE
            "#,
        )
        .bind(names)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Soft-delete currently-active symbols. No-ops count as zero.
    pub async fn deactivate(&self, names: &[String]) -> RepositoryResult<u64> {
        if names.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE symbols
            SET active = FALSE, removed_at = NOW(), updated_at = NOW()
            WHERE name = ANY($1) AND active = TRUE
            "#,
        )
        .bind(names)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Hard-delete symbols continuously inactive since before `cutoff`,
    /// cascading their candle history, metric snapshots, watchlist filters,
    /// and id mappings. With `dry_run` the report carries the counts and
    /// nothing is mutated.
    pub async fn purge_inactive_before(
        &self,
        cutoff: DateTime<Utc>,
        dry_run: bool,
    ) -> RepositoryResult<PurgeReport> {
        let rows = sqlx::query(
            r#"
            SELECT name FROM symbols
            WHERE active = FALSE AND removed_at IS NOT NULL AND removed_at < $1
            ORDER BY name
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        let symbols: Vec<String> = rows.iter().map(|r| r.get("name")).collect();

        if symbols.is_empty() {
            return Ok(PurgeReport {
                dry_run,
                ..PurgeReport::default()
            });
        }

        let candle_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n
            FROM candles c
            JOIN symbols s ON s.id = c.symbol_id
            WHERE s.name = ANY($1)
            "#,
        )
        .bind(&symbols)
        .fetch_one(&self.pool)
        .await?;
        let candles = candle_row.get::<i64, _>("n") as u64;

        if dry_run {
            info!(
                symbols = symbols.len(),
                candles, "retention purge dry-run, nothing deleted"
            );
            return Ok(PurgeReport {
                symbols,
                candles,
                dry_run: true,
            });
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM candles
            WHERE symbol_id IN (SELECT id FROM symbols WHERE name = ANY($1))
            "#,
        )
        .bind(&symbols)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM symbol_metrics WHERE symbol_name = ANY($1)")
            .bind(&symbols)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM watchlist_filters WHERE symbol_name = ANY($1)")
            .bind(&symbols)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            DELETE FROM ticker_ids
            WHERE ticker IN (SELECT LOWER(base_asset) FROM symbols WHERE name = ANY($1))
            "#,
        )
        .bind(&symbols)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM symbols WHERE name = ANY($1)")
            .bind(&symbols)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(symbols = symbols.len(), candles, "retention purge complete");
        Ok(PurgeReport {
            symbols,
            candles,
            dry_run: false,
        })
    }
}
