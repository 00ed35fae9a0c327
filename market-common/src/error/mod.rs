//! Error classification for retry logic and failure isolation.

mod traits;

pub use traits::{ErrorCategory, ErrorClassification};
