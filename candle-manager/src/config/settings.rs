//! Application settings and configuration

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Database configuration
    pub database: DatabaseSettings,
    /// Exchange REST/WebSocket configuration
    #[serde(default)]
    pub exchange: ExchangeSettings,
    /// Enrichment API configuration
    #[serde(default)]
    pub enrichment: EnrichmentSettings,
    /// Streaming consumer settings
    #[serde(default)]
    pub stream: StreamSettings,
    /// Write batcher settings
    #[serde(default)]
    pub batch: BatchSettings,
    /// Circuit breaker settings
    #[serde(default)]
    pub breaker: BreakerSettings,
    /// Backfill reconciler settings
    #[serde(default)]
    pub backfill: BackfillSettings,
    /// Watchlist lifecycle settings
    #[serde(default)]
    pub watchlist: WatchlistSettings,
    /// Background task scheduling
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

/// Exchange API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeSettings {
    /// REST API base URL
    #[serde(default = "default_exchange_rest_url")]
    pub rest_url: String,
    /// WebSocket stream base URL
    #[serde(default = "default_exchange_ws_url")]
    pub ws_url: String,
    /// Burst request ceiling (requests per second)
    #[serde(default = "default_exchange_rps")]
    pub requests_per_second: u32,
    /// Sustained request ceiling (requests per minute)
    #[serde(default = "default_exchange_rpm")]
    pub requests_per_minute: u32,
    /// Maximum klines per request accepted by the exchange
    #[serde(default = "default_kline_limit")]
    pub kline_limit_max: u32,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_exchange_rest_url() -> String {
    "https://fapi.binance.com".to_string()
}

fn default_exchange_ws_url() -> String {
    "wss://fstream.binance.com".to_string()
}

fn default_exchange_rps() -> u32 {
    10
}

fn default_exchange_rpm() -> u32 {
    1200
}

fn default_kline_limit() -> u32 {
    1000
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            rest_url: default_exchange_rest_url(),
            ws_url: default_exchange_ws_url(),
            requests_per_second: default_exchange_rps(),
            requests_per_minute: default_exchange_rpm(),
            kline_limit_max: default_kline_limit(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Enrichment API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentSettings {
    /// REST API base URL
    #[serde(default = "default_enrichment_rest_url")]
    pub rest_url: String,
    /// Burst request ceiling (requests per second)
    #[serde(default = "default_enrichment_rps")]
    pub requests_per_second: u32,
    /// Sustained request ceiling (requests per minute)
    #[serde(default = "default_enrichment_rpm")]
    pub requests_per_minute: u32,
    /// Markets-by-rank pages to fetch per refresh
    #[serde(default = "default_market_pages")]
    pub market_pages: u32,
    /// Markets per page
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_enrichment_rest_url() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}

fn default_enrichment_rps() -> u32 {
    2
}

fn default_enrichment_rpm() -> u32 {
    30
}

fn default_market_pages() -> u32 {
    3
}

fn default_page_size() -> u32 {
    250
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            rest_url: default_enrichment_rest_url(),
            requests_per_second: default_enrichment_rps(),
            requests_per_minute: default_enrichment_rpm(),
            market_pages: default_market_pages(),
            page_size: default_page_size(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Streaming consumer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Seconds without any message before a keepalive ping is sent
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// Periodic keepalive ping interval in seconds
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Initial reconnection delay in seconds
    #[serde(default = "default_initial_reconnect_delay")]
    pub initial_reconnect_delay_secs: u64,
    /// Maximum reconnection delay in seconds
    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_secs: u64,
}

fn default_read_timeout() -> u64 {
    30
}

fn default_ping_interval() -> u64 {
    180
}

fn default_initial_reconnect_delay() -> u64 {
    1
}

fn default_max_reconnect_delay() -> u64 {
    60
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            read_timeout_secs: default_read_timeout(),
            ping_interval_secs: default_ping_interval(),
            initial_reconnect_delay_secs: default_initial_reconnect_delay(),
            max_reconnect_delay_secs: default_max_reconnect_delay(),
        }
    }
}

/// Write batcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettings {
    /// Flush once this many updates are buffered
    #[serde(default = "default_batch_size")]
    pub max_size: usize,
    /// Flush once this many seconds have passed since the last flush
    #[serde(default = "default_batch_timeout")]
    pub max_age_secs: u64,
}

fn default_batch_size() -> usize {
    200
}

fn default_batch_timeout() -> u64 {
    5
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_size: default_batch_size(),
            max_age_secs: default_batch_timeout(),
        }
    }
}

/// Circuit breaker settings (one breaker per upstream)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds the breaker stays open before a half-open trial
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> u64 {
    60
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout(),
        }
    }
}

/// Backfill reconciler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillSettings {
    /// Recent candles fetched per reconciliation window
    #[serde(default = "default_window_limit")]
    pub window_limit: u32,
    /// Maximum retries per (symbol, timeframe) pair
    #[serde(default = "default_backfill_retries")]
    pub max_retries: u32,
    /// Base retry delay in seconds for transient failures
    #[serde(default = "default_backfill_base_delay")]
    pub base_delay_secs: u64,
    /// Base retry delay in seconds for rate-limit responses
    #[serde(default = "default_backfill_rate_limit_delay")]
    pub rate_limit_delay_secs: u64,
    /// Concurrent pairs reconciled during a sweep
    #[serde(default = "default_backfill_concurrency")]
    pub concurrency: usize,
}

fn default_window_limit() -> u32 {
    100
}

fn default_backfill_retries() -> u32 {
    3
}

fn default_backfill_base_delay() -> u64 {
    2
}

fn default_backfill_rate_limit_delay() -> u64 {
    30
}

fn default_backfill_concurrency() -> usize {
    4
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self {
            window_limit: default_window_limit(),
            max_retries: default_backfill_retries(),
            base_delay_secs: default_backfill_base_delay(),
            rate_limit_delay_secs: default_backfill_rate_limit_delay(),
            concurrency: default_backfill_concurrency(),
        }
    }
}

/// Watchlist lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistSettings {
    /// Fallback minimum 24h quote volume when no persisted config exists
    #[serde(default = "default_min_volume")]
    pub min_volume_24h: u64,
    /// Fallback minimum market capitalization when no persisted config exists
    #[serde(default = "default_min_market_cap")]
    pub min_market_cap: u64,
    /// Candle intervals tracked for every active instrument
    #[serde(default = "default_intervals")]
    pub intervals: Vec<String>,
    /// Quote asset required for tracked contracts
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    /// Days an instrument stays inactive before the purge removes it
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_min_volume() -> u64 {
    50_000_000
}

fn default_min_market_cap() -> u64 {
    50_000_000
}

fn default_intervals() -> Vec<String> {
    vec![
        "1m".to_string(),
        "1h".to_string(),
        "4h".to_string(),
        "1d".to_string(),
    ]
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

fn default_retention_days() -> i64 {
    180
}

impl Default for WatchlistSettings {
    fn default() -> Self {
        Self {
            min_volume_24h: default_min_volume(),
            min_market_cap: default_min_market_cap(),
            intervals: default_intervals(),
            quote_asset: default_quote_asset(),
            retention_days: default_retention_days(),
        }
    }
}

/// Background task scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Enrichment refresh interval in seconds
    #[serde(default = "default_enrichment_interval")]
    pub enrichment_interval_secs: u64,
    /// Gap-detection sweep interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Full watchlist sync interval in seconds
    #[serde(default = "default_sync_interval")]
    pub watchlist_sync_interval_secs: u64,
    /// Retention purge interval in seconds
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
    /// Grace period for background tasks on shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_enrichment_interval() -> u64 {
    300 // 5 minutes
}

fn default_sweep_interval() -> u64 {
    3600 // 1 hour
}

fn default_sync_interval() -> u64 {
    86_400 // daily
}

fn default_purge_interval() -> u64 {
    2_592_000 // 30 days
}

fn default_shutdown_grace() -> u64 {
    10
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enrichment_interval_secs: default_enrichment_interval(),
            sweep_interval_secs: default_sweep_interval(),
            watchlist_sync_interval_secs: default_sync_interval(),
            purge_interval_secs: default_purge_interval(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl Settings {
    /// Load settings from configuration files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_prefix("CANDLE_MANAGER")
    }

    /// Load settings with a custom environment variable prefix
    pub fn load_with_prefix(env_prefix: &str) -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config_dir = Self::config_dir();

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
            // Add environment-specific configuration
            .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
            // Add local overrides (not checked into git)
            .add_source(File::with_name(&format!("{}/local", config_dir)).required(false))
            // Add environment variables (e.g., CANDLE_MANAGER__DATABASE__URL)
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    /// Get the configuration directory path
    fn config_dir() -> String {
        std::env::var("CANDLE_MANAGER_CONFIG_DIR").unwrap_or_else(|_| "config".into())
    }

    /// Create default settings (useful for testing)
    pub fn default_settings() -> Self {
        Settings {
            database: DatabaseSettings {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgresql://localhost/candle_manager".into()),
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
            },
            exchange: ExchangeSettings::default(),
            enrichment: EnrichmentSettings::default(),
            stream: StreamSettings::default(),
            batch: BatchSettings::default(),
            breaker: BreakerSettings::default(),
            backfill: BackfillSettings::default(),
            watchlist: WatchlistSettings::default(),
            scheduler: SchedulerSettings::default(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::default_settings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default_settings();
        assert_eq!(settings.database.max_connections, 10);
        assert_eq!(settings.exchange.kline_limit_max, 1000);
        assert_eq!(settings.batch.max_size, 200);
        assert_eq!(settings.watchlist.retention_days, 180);
    }

    #[test]
    fn test_default_intervals_parse() {
        let settings = Settings::default_settings();
        for name in &settings.watchlist.intervals {
            assert!(market_common::Interval::parse(name).is_ok());
        }
    }
}
