//! Reconciliation of transfers whose debit was written but whose credit was not.
//!
//! The coordinator queues such transfers; the [`Reconciler`] worker re-drives
//! the pending credit and marks the entry resolved. Transfers whose writes have
//! an unknown outcome are queued as `NeedsReview` and left to an operator.

pub mod queue;
pub mod reconciler;

pub use queue::{
    EntryStatus, InMemoryReconciliationQueue, ReconciliationEntry, ReconciliationError,
    ReconciliationQueue,
};
pub use reconciler::{ReconcileStats, Reconciler, ReconcilerConfig, ReconcilerHandle};
