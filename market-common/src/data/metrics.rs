//! Per-instrument market metric snapshots used for watchlist qualification.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Snapshot of the enrichment metrics for one instrument.
///
/// `symbol` is the exchange trading symbol (e.g. `BTCUSDT`); the metrics
/// come from the enrichment API and describe the underlying base asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketMetrics {
    pub symbol: String,
    /// Market capitalization in quote currency
    pub market_cap: Decimal,
    /// 24h traded volume in quote currency
    pub volume_24h: Decimal,
    /// When the snapshot was taken
    pub fetched_at: DateTime<Utc>,
}

impl MarketMetrics {
    pub fn new(symbol: impl Into<String>, market_cap: Decimal, volume_24h: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            market_cap,
            volume_24h,
            fetched_at: Utc::now(),
        }
    }
}
