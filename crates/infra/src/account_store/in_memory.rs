use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;

use wallet_core::{AccountId, DomainError, ExpectedVersion, Versioned};
use wallet_ledger::{Account, BalanceUpdate};

use super::r#trait::{AccountStore, AccountStoreError, ensure_distinct, lock_order_indices};

type Cell = Arc<Mutex<Account>>;

/// In-memory account store.
///
/// Each account lives in its own mutex cell; the map itself is only
/// write-locked to open accounts. Writes to different accounts never contend.
/// Batch updates lock cells in ascending id order, so two batches over the
/// same pair cannot deadlock.
///
/// Intended for tests/dev and as the reference implementation of the store
/// contract.
#[derive(Debug)]
pub struct InMemoryAccountStore {
    accounts: RwLock<HashMap<AccountId, Cell>>,
    atomic_batches: bool,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            atomic_batches: true,
        }
    }

    /// A store that reports no atomic batch support, so callers fall back to
    /// single-key writes.
    pub fn without_atomic_batches() -> Self {
        Self {
            atomic_batches: false,
            ..Self::new()
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Sum of all balances.
    pub fn total_balance(&self) -> Result<i128, AccountStoreError> {
        let cells: Vec<Cell> = self.read_map()?.values().cloned().collect();
        let mut total = 0i128;
        for cell in cells {
            total += lock(&cell)?.balance() as i128;
        }
        Ok(total)
    }

    pub fn len(&self) -> usize {
        self.read_map().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_map(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<AccountId, Cell>>, AccountStoreError> {
        self.accounts
            .read()
            .map_err(|_| AccountStoreError::Backend("lock poisoned".to_string()))
    }

    fn cell(&self, id: AccountId) -> Result<Cell, AccountStoreError> {
        self.read_map()?
            .get(&id)
            .cloned()
            .ok_or(AccountStoreError::NotFound(id))
    }
}

impl Default for InMemoryAccountStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(cell: &Cell) -> Result<MutexGuard<'_, Account>, AccountStoreError> {
    cell.lock()
        .map_err(|_| AccountStoreError::Backend("lock poisoned".to_string()))
}

fn write(
    account: &mut Account,
    expected: ExpectedVersion,
    new_balance: i64,
) -> Result<u64, AccountStoreError> {
    let account_id = account.account_id();
    let actual = account.version();
    account
        .write_balance(expected, new_balance)
        .map_err(|e| match e {
            DomainError::Conflict(_) => AccountStoreError::VersionConflict {
                account_id,
                expected,
                actual,
            },
            DomainError::InvariantViolation(_) => AccountStoreError::NegativeBalance(account_id),
            other => AccountStoreError::Backend(other.to_string()),
        })
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn open(&self, account: Account) -> Result<Account, AccountStoreError> {
        let mut accounts = self
            .accounts
            .write()
            .map_err(|_| AccountStoreError::Backend("lock poisoned".to_string()))?;

        let id = account.account_id();
        if accounts.contains_key(&id) {
            return Err(AccountStoreError::AlreadyExists(id));
        }
        accounts.insert(id, Arc::new(Mutex::new(account.clone())));
        Ok(account)
    }

    async fn get(&self, id: AccountId) -> Result<Account, AccountStoreError> {
        let cell = self.cell(id)?;
        let account = lock(&cell)?;
        Ok(account.clone())
    }

    async fn compare_and_swap(
        &self,
        id: AccountId,
        expected: ExpectedVersion,
        new_balance: i64,
    ) -> Result<u64, AccountStoreError> {
        if new_balance < 0 {
            return Err(AccountStoreError::NegativeBalance(id));
        }
        let cell = self.cell(id)?;
        let mut account = lock(&cell)?;
        write(&mut account, expected, new_balance)
    }

    fn supports_atomic_batch(&self) -> bool {
        self.atomic_batches
    }

    async fn compare_and_swap_many(
        &self,
        updates: &[BalanceUpdate],
    ) -> Result<Vec<u64>, AccountStoreError> {
        if !self.atomic_batches {
            return Err(AccountStoreError::BatchUnsupported);
        }
        ensure_distinct(updates)?;

        let order = lock_order_indices(updates);
        let cells = order
            .iter()
            .map(|&idx| self.cell(updates[idx].account_id))
            .collect::<Result<Vec<_>, _>>()?;

        // Lock every cell (ascending id) before checking anything.
        let mut guards = Vec::with_capacity(cells.len());
        for cell in &cells {
            guards.push(lock(cell)?);
        }

        for (guard, &idx) in guards.iter().zip(&order) {
            let update = &updates[idx];
            if !update.expected_version.matches(guard.version()) {
                return Err(AccountStoreError::VersionConflict {
                    account_id: update.account_id,
                    expected: update.expected_version,
                    actual: guard.version(),
                });
            }
            if update.new_balance < 0 {
                return Err(AccountStoreError::NegativeBalance(update.account_id));
            }
        }

        let mut versions = vec![0u64; updates.len()];
        for (guard, &idx) in guards.iter_mut().zip(&order) {
            let update = &updates[idx];
            versions[idx] = write(guard, update.expected_version, update.new_balance)?;
        }

        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(account: &Account, new_balance: i64) -> BalanceUpdate {
        BalanceUpdate {
            account_id: account.account_id(),
            expected_version: account.expected_version(),
            new_balance,
        }
    }

    async fn opened(store: &InMemoryAccountStore, balance: i64) -> Account {
        store
            .open(Account::open(AccountId::new(), balance).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn get_unknown_account_is_not_found() {
        let store = InMemoryAccountStore::new();
        let id = AccountId::new();
        assert_eq!(store.get(id).await, Err(AccountStoreError::NotFound(id)));
    }

    #[tokio::test]
    async fn open_twice_is_rejected() {
        let store = InMemoryAccountStore::new();
        let account = opened(&store, 10).await;

        let err = store.open(account.clone()).await.unwrap_err();
        assert_eq!(err, AccountStoreError::AlreadyExists(account.account_id()));
    }

    #[tokio::test]
    async fn compare_and_swap_bumps_version() {
        let store = InMemoryAccountStore::new();
        let account = opened(&store, 10).await;

        let v = store
            .compare_and_swap(account.account_id(), account.expected_version(), 3)
            .await
            .unwrap();

        assert_eq!(v, 2);
        let reloaded = store.get(account.account_id()).await.unwrap();
        assert_eq!(reloaded.balance(), 3);
        assert_eq!(reloaded.version(), 2);
    }

    #[tokio::test]
    async fn stale_compare_and_swap_conflicts() {
        let store = InMemoryAccountStore::new();
        let account = opened(&store, 10).await;
        let id = account.account_id();
        store.compare_and_swap(id, account.expected_version(), 9).await.unwrap();

        let err = store
            .compare_and_swap(id, account.expected_version(), 8)
            .await
            .unwrap_err();

        assert!(matches!(err, AccountStoreError::VersionConflict { actual: 2, .. }));
        assert_eq!(store.get(id).await.unwrap().balance(), 9);
    }

    #[tokio::test]
    async fn negative_balance_is_never_written() {
        let store = InMemoryAccountStore::new();
        let account = opened(&store, 10).await;

        let err = store
            .compare_and_swap(account.account_id(), account.expected_version(), -1)
            .await
            .unwrap_err();

        assert_eq!(err, AccountStoreError::NegativeBalance(account.account_id()));
        assert_eq!(store.get(account.account_id()).await.unwrap(), account);
    }

    #[tokio::test]
    async fn batch_is_all_or_nothing() {
        let store = InMemoryAccountStore::new();
        let a = opened(&store, 10).await;
        let b = opened(&store, 0).await;

        // b is stale after this write
        store.compare_and_swap(b.account_id(), b.expected_version(), 1).await.unwrap();

        let err = store
            .compare_and_swap_many(&[update(&a, 5), update(&b, 5)])
            .await
            .unwrap_err();

        assert!(matches!(err, AccountStoreError::VersionConflict { .. }));
        assert_eq!(store.get(a.account_id()).await.unwrap(), a);
        assert_eq!(store.get(b.account_id()).await.unwrap().balance(), 1);
    }

    #[tokio::test]
    async fn batch_returns_versions_in_caller_order() {
        let store = InMemoryAccountStore::new();
        let a = opened(&store, 10).await;
        let b = opened(&store, 0).await;
        store.compare_and_swap(b.account_id(), b.expected_version(), 0).await.unwrap();
        let b = store.get(b.account_id()).await.unwrap();

        let versions = store
            .compare_and_swap_many(&[update(&b, 4), update(&a, 6)])
            .await
            .unwrap();

        assert_eq!(versions, vec![3, 2]);
        assert_eq!(store.total_balance().unwrap(), 10);
    }

    #[tokio::test]
    async fn batch_rejects_duplicate_accounts() {
        let store = InMemoryAccountStore::new();
        let a = opened(&store, 10).await;

        let err = store
            .compare_and_swap_many(&[update(&a, 5), update(&a, 6)])
            .await
            .unwrap_err();

        assert!(matches!(err, AccountStoreError::InvalidBatch(_)));
    }

    #[tokio::test]
    async fn batch_unsupported_when_disabled() {
        let store = InMemoryAccountStore::without_atomic_batches();
        let a = opened(&store, 10).await;

        assert!(!store.supports_atomic_batch());
        assert_eq!(
            store.compare_and_swap_many(&[update(&a, 1)]).await,
            Err(AccountStoreError::BatchUnsupported)
        );
    }
}
