//! Transfer pipeline: intent ordering, commit paths, retry loop, coordination.
//!
//! ## Flow
//!
//! ```text
//! TransactionCoordinator::submit_transfer()
//!   └─ LedgerEngine::execute()           (retry loop, cancellation)
//!        ├─ check_request()              (same account, amount)
//!        ├─ IntentSet::acquire()         (ordered reads → version tokens)
//!        ├─ plan_transfer()              (existence, funds, post-balances)
//!        └─ commit_atomic()              (store supports multi-key CAS)
//!           commit_compensating()        (debit, then retried credit)
//! ```
//!
//! Every store call goes through [`bounded`], so a stalled store surfaces as a
//! `Timeout` instead of hanging the transfer. A write that times out or loses
//! its backend connection may still have landed: the affected account is
//! re-read and the write is treated as landed, not landed, or unknown. Unknown
//! outcomes are escalated for review, never retried.

mod commit;
mod coordinator;
mod engine;
mod error;
mod intents;

use std::future::Future;
use std::time::Duration;

pub use commit::{CommitError, CommitReport, CreditFailure, CreditOutcome, apply_credit};
pub use coordinator::TransactionCoordinator;
pub use engine::{EngineOutcome, LedgerEngine};
pub use error::TransferError;

use crate::account_store::AccountStoreError;
use crate::retry::RetryPolicy;

/// Tunables of the transfer pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSettings {
    /// Validate-then-mutate attempts on version conflicts.
    pub retry: RetryPolicy,
    /// Credit attempts once the debit has been written (fallback path).
    pub credit_retry: RetryPolicy,
    /// Upper bound for every single store call.
    pub store_timeout: Duration,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            credit_retry: RetryPolicy::exponential(
                8,
                Duration::from_millis(5),
                Duration::from_millis(200),
            ),
            store_timeout: Duration::from_secs(2),
        }
    }
}

impl TransferSettings {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_credit_retry(mut self, credit_retry: RetryPolicy) -> Self {
        self.credit_retry = credit_retry;
        self
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }
}

/// Run one store call under `timeout`.
///
/// An expired call is reported as [`TransferError::Timeout`]. For writes that
/// is ambiguous (see [`TransferError::is_ambiguous`]).
pub(crate) async fn bounded<T, F>(
    operation: &'static str,
    timeout: Duration,
    call: F,
) -> Result<T, TransferError>
where
    F: Future<Output = Result<T, AccountStoreError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(TransferError::from),
        Err(_) => Err(TransferError::Timeout { operation, timeout }),
    }
}
