//! Streaming ingestion: the kline WebSocket consumer and the write batcher.

mod batcher;
mod consumer;

use std::time::Duration;

use market_common::{ErrorCategory, ErrorClassification};
use thiserror::Error;

pub use batcher::{BatchBuffer, CandleBatcher, FlushOutcome};
pub use consumer::{
    build_stream_url, resubscribe_channel, KlineStreamConsumer, StreamCounters,
    StreamResubscriber,
};

/// Streaming errors
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StreamError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("connection lost: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ErrorClassification for StreamError {
    fn category(&self) -> ErrorCategory {
        match self {
            StreamError::Connect(_) | StreamError::Connection(_) => ErrorCategory::Transient,
            StreamError::Protocol(_) => ErrorCategory::Internal,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            StreamError::Connect(_) | StreamError::Connection(_) => Some(Duration::from_secs(1)),
            StreamError::Protocol(_) => None,
        }
    }
}
