//! Configuration loading and settings types.

mod settings;

pub use settings::{
    BackfillSettings, BatchSettings, BreakerSettings, DatabaseSettings, EnrichmentSettings,
    ExchangeSettings, SchedulerSettings, Settings, StreamSettings, WatchlistSettings,
};
