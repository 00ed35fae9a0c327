//! Persistence layer.
//!
//! Short-lived sessions scoped to a single logical operation: one batch
//! flush, one reconciliation commit, one lifecycle transition. No
//! transaction is held open across a network call to an upstream API.

mod candles;
mod repository;
mod symbols;
mod watchlist;

use std::time::Duration;

use market_common::{ErrorCategory, ErrorClassification};
use thiserror::Error;

pub use candles::CandleRepository;
pub use repository::{DatabaseStats, Storage};
pub use symbols::{PurgeReport, SymbolRecord, SymbolRepository};
pub use watchlist::{
    CachedTickerIds, FilterKind, QualificationThresholds, WatchlistRepository,
};

/// Repository errors
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl ErrorClassification for RepositoryError {
    fn category(&self) -> ErrorCategory {
        match self {
            RepositoryError::Database(_) => ErrorCategory::Transient,
            RepositoryError::Configuration(_) => ErrorCategory::Configuration,
            RepositoryError::NotFound(_) => ErrorCategory::Permanent,
            RepositoryError::InvalidData(_) => ErrorCategory::Permanent,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            RepositoryError::Database(_) => Some(Duration::from_millis(500)),
            _ => None,
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;
