//! In-memory universe of actively tracked (instrument, interval) pairs.
//!
//! The only state mutated from more than one task; always accessed under
//! its lock. Observers are invoked outside the lock so a slow or faulty
//! subscriber cannot block updates or corrupt the held state.

use std::collections::HashSet;
use std::sync::Arc;

use market_common::Interval;
use parking_lot::RwLock;
use tracing::{debug, warn};

/// Observer notified after the tracked universe changes.
///
/// Implementations must not panic; errors are logged and never propagated,
/// so one failing observer cannot starve the others.
pub trait UniverseObserver: Send + Sync {
    fn name(&self) -> &str;

    fn on_universe_change(
        &self,
        instruments: &[String],
        intervals: &[Interval],
        added: &[String],
        removed: &[String],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

struct State {
    instruments: Vec<String>,
    intervals: Vec<Interval>,
}

/// Lock-guarded (instrument-list, interval-list) pair plus subscribers.
pub struct SymbolUniverse {
    state: RwLock<State>,
    observers: RwLock<Vec<Arc<dyn UniverseObserver>>>,
}

impl SymbolUniverse {
    pub fn new(intervals: Vec<Interval>) -> Self {
        Self {
            state: RwLock::new(State {
                instruments: Vec::new(),
                intervals,
            }),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Register an observer for subsequent updates.
    pub fn subscribe(&self, observer: Arc<dyn UniverseObserver>) {
        self.observers.write().push(observer);
    }

    /// Current (instruments, intervals) copy.
    pub fn snapshot(&self) -> (Vec<String>, Vec<Interval>) {
        let state = self.state.read();
        (state.instruments.clone(), state.intervals.clone())
    }

    pub fn len(&self) -> usize {
        self.state.read().instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().instruments.is_empty()
    }

    /// Swap in a new universe, returning the (added, removed) instrument
    /// delta. Observers run after the lock is released; when nothing
    /// changed they are not invoked.
    pub fn update(
        &self,
        mut instruments: Vec<String>,
        intervals: Vec<Interval>,
    ) -> (Vec<String>, Vec<String>) {
        instruments.sort();
        instruments.dedup();

        let (added, removed, changed, snapshot) = {
            let mut state = self.state.write();

            let old: HashSet<&String> = state.instruments.iter().collect();
            let new: HashSet<&String> = instruments.iter().collect();

            let mut added: Vec<String> =
                new.difference(&old).map(|s| s.to_string()).collect();
            let mut removed: Vec<String> =
                old.difference(&new).map(|s| s.to_string()).collect();
            added.sort();
            removed.sort();

            let changed =
                !added.is_empty() || !removed.is_empty() || state.intervals != intervals;

            state.instruments = instruments;
            state.intervals = intervals;

            (
                added,
                removed,
                changed,
                (state.instruments.clone(), state.intervals.clone()),
            )
        };

        if changed {
            debug!(
                added = added.len(),
                removed = removed.len(),
                total = snapshot.0.len(),
                "universe updated"
            );
            let observers: Vec<Arc<dyn UniverseObserver>> = self.observers.read().clone();
            for observer in observers {
                if let Err(e) =
                    observer.on_universe_change(&snapshot.0, &snapshot.1, &added, &removed)
                {
                    warn!(observer = observer.name(), error = %e, "universe observer failed");
                }
            }
        }

        (added, removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder {
        calls: AtomicUsize,
        fail: bool,
    }

    impl Recorder {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    impl UniverseObserver for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn on_universe_change(
            &self,
            _instruments: &[String],
            _intervals: &[Interval],
            _added: &[String],
            _removed: &[String],
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err("observer exploded".into())
            } else {
                Ok(())
            }
        }
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn computes_added_and_removed_delta() {
        let universe = SymbolUniverse::new(vec![Interval::OneHour]);
        universe.update(names(&["BTCUSDT", "ETHUSDT"]), vec![Interval::OneHour]);

        let (added, removed) =
            universe.update(names(&["ETHUSDT", "SOLUSDT"]), vec![Interval::OneHour]);
        assert_eq!(added, names(&["SOLUSDT"]));
        assert_eq!(removed, names(&["BTCUSDT"]));
    }

    #[test]
    fn no_change_means_no_notification() {
        let universe = SymbolUniverse::new(vec![Interval::OneHour]);
        universe.update(names(&["BTCUSDT"]), vec![Interval::OneHour]);

        let recorder = Recorder::new(false);
        universe.subscribe(recorder.clone());

        universe.update(names(&["BTCUSDT"]), vec![Interval::OneHour]);
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn interval_change_alone_notifies() {
        let universe = SymbolUniverse::new(vec![Interval::OneHour]);
        universe.update(names(&["BTCUSDT"]), vec![Interval::OneHour]);

        let recorder = Recorder::new(false);
        universe.subscribe(recorder.clone());

        universe.update(
            names(&["BTCUSDT"]),
            vec![Interval::OneHour, Interval::OneDay],
        );
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_observer_does_not_block_others() {
        let universe = SymbolUniverse::new(vec![Interval::OneHour]);
        let failing = Recorder::new(true);
        let healthy = Recorder::new(false);
        universe.subscribe(failing.clone());
        universe.subscribe(healthy.clone());

        universe.update(names(&["BTCUSDT"]), vec![Interval::OneHour]);

        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.calls.load(Ordering::SeqCst), 1);

        // State stayed consistent despite the failure.
        let (instruments, _) = universe.snapshot();
        assert_eq!(instruments, names(&["BTCUSDT"]));
    }

    #[test]
    fn duplicate_instruments_are_deduplicated() {
        let universe = SymbolUniverse::new(vec![Interval::OneHour]);
        universe.update(names(&["BTCUSDT", "BTCUSDT"]), vec![Interval::OneHour]);
        assert_eq!(universe.len(), 1);
    }
}
