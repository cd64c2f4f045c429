//! Infrastructure layer: account storage, the transfer pipeline, reconciliation, config.

pub mod account_store;
pub mod config;
pub mod reconciliation;
pub mod retry;
pub mod transfer;


pub use account_store::{AccountStore, AccountStoreError, InMemoryAccountStore, PostgresAccountStore};
pub use config::{ConfigError, WalletConfig};
pub use reconciliation::{
    EntryStatus, InMemoryReconciliationQueue, ReconcileStats, ReconciliationEntry,
    ReconciliationError, ReconciliationQueue, Reconciler, ReconcilerConfig, ReconcilerHandle,
};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use transfer::{
    CommitReport, EngineOutcome, LedgerEngine, TransactionCoordinator, TransferError,
    TransferSettings,
};
