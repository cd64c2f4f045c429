use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use wallet_core::{AccountId, ExpectedVersion};
use wallet_ledger::{Account, BalanceUpdate};

/// Account store operation error.
///
/// ## Error Categories
///
/// - **NotFound**: the account does not exist
/// - **VersionConflict**: the presented version is stale (someone else wrote first)
/// - **NegativeBalance**: the write would break `balance >= 0`; nothing was written
/// - **AlreadyExists**: `open` with an id that is taken
/// - **InvalidBatch**: malformed multi-key update (e.g. duplicate ids)
/// - **BatchUnsupported**: the backend has no atomic multi-key update
/// - **Backend**: storage failure (connection, poisoned lock, corrupt row)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccountStoreError {
    #[error("account not found: {0}")]
    NotFound(AccountId),

    #[error("version conflict on account {account_id} (expected {expected}, found v{actual})")]
    VersionConflict {
        account_id: AccountId,
        expected: ExpectedVersion,
        actual: u64,
    },

    #[error("balance of account {0} would become negative")]
    NegativeBalance(AccountId),

    #[error("account already exists: {0}")]
    AlreadyExists(AccountId),

    #[error("invalid batch update: {0}")]
    InvalidBatch(String),

    #[error("atomic multi-key updates are not supported by this store")]
    BatchUnsupported,

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Persistent mapping of account id → `{balance, version}`.
///
/// ## Write Semantics
///
/// `compare_and_swap()`:
/// - writes only if the persisted version equals `expected`
/// - never writes a negative balance
/// - bumps the version by exactly one and returns it
///
/// `compare_and_swap_many()` (optional):
/// - all entries succeed or none is written
/// - entries are locked/applied in ascending account id order, whatever order
///   the caller passes them in
/// - returns new versions in the caller's order
///
/// Implementations must be safe to call concurrently from many tasks; callers
/// bound every call with a timeout.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a freshly opened account.
    async fn open(&self, account: Account) -> Result<Account, AccountStoreError>;

    /// Read the current snapshot of an account.
    async fn get(&self, id: AccountId) -> Result<Account, AccountStoreError>;

    /// Conditionally replace one balance.
    async fn compare_and_swap(
        &self,
        id: AccountId,
        expected: ExpectedVersion,
        new_balance: i64,
    ) -> Result<u64, AccountStoreError>;

    /// Whether `compare_and_swap_many` is available.
    fn supports_atomic_batch(&self) -> bool {
        false
    }

    /// Atomically apply several conditional writes.
    async fn compare_and_swap_many(
        &self,
        updates: &[BalanceUpdate],
    ) -> Result<Vec<u64>, AccountStoreError> {
        let _ = updates;
        Err(AccountStoreError::BatchUnsupported)
    }
}

#[async_trait]
impl<S> AccountStore for Arc<S>
where
    S: AccountStore + ?Sized,
{
    async fn open(&self, account: Account) -> Result<Account, AccountStoreError> {
        (**self).open(account).await
    }

    async fn get(&self, id: AccountId) -> Result<Account, AccountStoreError> {
        (**self).get(id).await
    }

    async fn compare_and_swap(
        &self,
        id: AccountId,
        expected: ExpectedVersion,
        new_balance: i64,
    ) -> Result<u64, AccountStoreError> {
        (**self).compare_and_swap(id, expected, new_balance).await
    }

    fn supports_atomic_batch(&self) -> bool {
        (**self).supports_atomic_batch()
    }

    async fn compare_and_swap_many(
        &self,
        updates: &[BalanceUpdate],
    ) -> Result<Vec<u64>, AccountStoreError> {
        (**self).compare_and_swap_many(updates).await
    }
}

/// Reject batches that name the same account twice.
pub(crate) fn ensure_distinct(updates: &[BalanceUpdate]) -> Result<(), AccountStoreError> {
    for (idx, update) in updates.iter().enumerate() {
        if updates[..idx].iter().any(|u| u.account_id == update.account_id) {
            return Err(AccountStoreError::InvalidBatch(format!(
                "account {} appears more than once (index {idx})",
                update.account_id
            )));
        }
    }
    Ok(())
}

/// Indices of `updates` sorted by ascending account id.
pub(crate) fn lock_order_indices(updates: &[BalanceUpdate]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..updates.len()).collect();
    order.sort_by_key(|&idx| updates[idx].account_id);
    order
}
