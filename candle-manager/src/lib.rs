//! # Candle Manager
//!
//! Resilient OHLCV ingestion service for a dynamic universe of
//! exchange-traded perpetual contracts.
//!
//! ## Features
//!
//! - **Live streaming**: multiplexed kline WebSocket subscription with
//!   reconnect backoff, keepalive pings, and per-message validation
//! - **Write batching**: size-or-time triggered flushes with distinct
//!   merge semantics for closed vs. in-progress candles
//! - **Backfill reconciliation**: periodic and on-demand gap detection
//!   against REST-fetched windows, committed atomically
//! - **Watchlist lifecycle**: market-cap/volume qualification with manual
//!   whitelist/blacklist overrides, soft-delete hysteresis, and a
//!   retention purge with dry-run support
//!
//! ## Architecture
//!
//! The exchange REST client sits behind a dual-window rate limiter and a
//! circuit breaker. Parsed stream updates flow through the write batcher
//! into PostgreSQL; finalized candles and universe changes are announced
//! on the in-process event bus for downstream consumers.

pub mod cli;
pub mod config;
pub mod provider;
pub mod reconcile;
pub mod resilience;
pub mod storage;
pub mod stream;
pub mod symbol;

// Re-export commonly used types
pub use config::Settings;
pub use provider::{ProviderError, ProviderResult};
pub use reconcile::BackfillReconciler;
pub use storage::Storage;
pub use stream::{CandleBatcher, KlineStreamConsumer};
pub use symbol::{LifecycleManager, SymbolUniverse};
