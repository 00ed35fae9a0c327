//! Symbol universe and lifecycle management.

mod lifecycle;
mod universe;

pub use lifecycle::{qualifies, LifecycleManager, SyncReport};
pub use universe::{SymbolUniverse, UniverseObserver};
