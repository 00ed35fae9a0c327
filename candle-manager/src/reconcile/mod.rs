//! Gap detection and backfill reconciliation.

mod backfill;

pub use backfill::{
    candles_match, plan_reconciliation, reconcile_window, within_tolerance, BackfillReconciler,
    ReconcileOutcome, ReconciliationPlan, SweepSummary,
};
