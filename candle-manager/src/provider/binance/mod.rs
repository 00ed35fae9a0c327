//! Exchange data provider (Binance futures API shape).

mod normalizer;
mod rest;
pub mod types;

pub use normalizer::{parse_stream_message, KlineMessage, KlineParseError};
pub use rest::{BinanceRestClient, ExchangeSymbol};
pub use types::{KlineEvent, KlinePayload, StreamEnvelope, Ticker24h};
