//! Enrichment data provider (CoinGecko API shape).
//!
//! Supplies market capitalization and 24h volume for watchlist
//! qualification, plus a three-tier ticker-to-id resolution strategy
//! backed by a persisted mapping cache.

mod client;
pub mod types;

pub use client::{CoinGeckoClient, TickerIdCache};
pub use types::{CoinMarket, SearchCoin};
