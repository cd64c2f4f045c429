//! Postgres-backed account store.
//!
//! One row per account: `accounts(id, balance, version)`. The `CHECK
//! (balance >= 0)` constraint backs the non-negative invariant at the database
//! level as well.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | AccountStoreError |
//! |------------|----------------------|-------------------|
//! | Database (unique violation) | `23505` | `AlreadyExists` (on open) |
//! | Database (check constraint violation) | `23514` | `NegativeBalance` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / Io / other | N/A | `Backend` |

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use tracing::instrument;
use uuid::Uuid;

use wallet_core::{AccountId, ExpectedVersion};
use wallet_ledger::{Account, BalanceUpdate};

use super::r#trait::{AccountStore, AccountStoreError, ensure_distinct, lock_order_indices};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id      UUID PRIMARY KEY,
    balance BIGINT NOT NULL CHECK (balance >= 0),
    version BIGINT NOT NULL CHECK (version >= 1)
)
"#;

/// Postgres-backed account store.
///
/// Single-key writes are one conditional `UPDATE ... WHERE version = $n`.
/// Batch writes run in one transaction that row-locks the accounts with
/// `SELECT ... ORDER BY id FOR UPDATE`, so concurrent batches over the same
/// accounts queue up in id order instead of deadlocking.
#[derive(Debug, Clone)]
pub struct PostgresAccountStore {
    pool: Arc<PgPool>,
}

impl PostgresAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self, AccountStoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the `accounts` table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<(), AccountStoreError> {
        sqlx::query(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn current_version(&self, id: AccountId) -> Result<Option<u64>, AccountStoreError> {
        let row = sqlx::query("SELECT version FROM accounts WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("current_version", e))?;

        row.map(|r| read_version(&r, "version")).transpose()
    }
}

#[async_trait]
impl AccountStore for PostgresAccountStore {
    #[instrument(skip(self, account), fields(account_id = %account.account_id()), err)]
    async fn open(&self, account: Account) -> Result<Account, AccountStoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO accounts (id, balance, version)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(*account.account_id().as_uuid())
        .bind(account.balance())
        .bind(Account::INITIAL_VERSION as i64)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("open", e))?;

        if inserted.rows_affected() == 0 {
            return Err(AccountStoreError::AlreadyExists(account.account_id()));
        }
        Account::from_parts(account.account_id(), account.balance(), Account::INITIAL_VERSION)
            .map_err(|e| AccountStoreError::Backend(e.to_string()))
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn get(&self, id: AccountId) -> Result<Account, AccountStoreError> {
        let row = sqlx::query("SELECT id, balance, version FROM accounts WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?
            .ok_or(AccountStoreError::NotFound(id))?;

        account_from_row(&row)
    }

    #[instrument(skip(self), fields(account_id = %id, expected = %expected), err)]
    async fn compare_and_swap(
        &self,
        id: AccountId,
        expected: ExpectedVersion,
        new_balance: i64,
    ) -> Result<u64, AccountStoreError> {
        if new_balance < 0 {
            return Err(AccountStoreError::NegativeBalance(id));
        }

        let row = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = $3, version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING version
            "#,
        )
        .bind(*id.as_uuid())
        .bind(expected.value() as i64)
        .bind(new_balance)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_write_error("compare_and_swap", id, e))?;

        if let Some(row) = row {
            return read_version(&row, "version");
        }

        // Nothing updated: either the account is gone or the version moved on.
        match self.current_version(id).await? {
            Some(actual) => Err(AccountStoreError::VersionConflict {
                account_id: id,
                expected,
                actual,
            }),
            None => Err(AccountStoreError::NotFound(id)),
        }
    }

    fn supports_atomic_batch(&self) -> bool {
        true
    }

    #[instrument(skip(self, updates), fields(batch_size = updates.len()), err)]
    async fn compare_and_swap_many(
        &self,
        updates: &[BalanceUpdate],
    ) -> Result<Vec<u64>, AccountStoreError> {
        ensure_distinct(updates)?;
        if let Some(negative) = updates.iter().find(|u| u.new_balance < 0) {
            return Err(AccountStoreError::NegativeBalance(negative.account_id));
        }

        let order = lock_order_indices(updates);
        let ids: Vec<Uuid> = order
            .iter()
            .map(|&idx| *updates[idx].account_id.as_uuid())
            .collect();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Row locks are taken in ascending id order.
        let locked = sqlx::query(
            r#"
            SELECT id, version
            FROM accounts
            WHERE id = ANY($1)
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_accounts", e))?;

        for &idx in &order {
            let update = &updates[idx];
            let row = locked.iter().find(|row| {
                row.try_get::<Uuid, _>("id")
                    .map(|id| id == *update.account_id.as_uuid())
                    .unwrap_or(false)
            });
            let Some(row) = row else {
                rollback(tx).await?;
                return Err(AccountStoreError::NotFound(update.account_id));
            };
            let actual = read_version(row, "version")?;
            if !update.expected_version.matches(actual) {
                rollback(tx).await?;
                return Err(AccountStoreError::VersionConflict {
                    account_id: update.account_id,
                    expected: update.expected_version,
                    actual,
                });
            }
        }

        let mut versions = vec![0u64; updates.len()];
        for &idx in &order {
            let update = &updates[idx];
            let row = sqlx::query(
                r#"
                UPDATE accounts
                SET balance = $2, version = version + 1
                WHERE id = $1
                RETURNING version
                "#,
            )
            .bind(*update.account_id.as_uuid())
            .bind(update.new_balance)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_write_error("apply_batch", update.account_id, e))?;
            versions[idx] = read_version(&row, "version")?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(versions)
    }
}

async fn rollback(tx: Transaction<'_, Postgres>) -> Result<(), AccountStoreError> {
    tx.rollback()
        .await
        .map_err(|e| map_sqlx_error("rollback", e))
}

fn account_from_row(row: &PgRow) -> Result<Account, AccountStoreError> {
    let id: Uuid = row
        .try_get("id")
        .map_err(|e| AccountStoreError::Backend(format!("failed to read account id: {e}")))?;
    let balance: i64 = row
        .try_get("balance")
        .map_err(|e| AccountStoreError::Backend(format!("failed to read balance: {e}")))?;
    let version = read_version(row, "version")?;

    Account::from_parts(AccountId::from_uuid(id), balance, version)
        .map_err(|e| AccountStoreError::Backend(format!("corrupt account row: {e}")))
}

fn read_version(row: &PgRow, column: &str) -> Result<u64, AccountStoreError> {
    let raw: i64 = row
        .try_get(column)
        .map_err(|e| AccountStoreError::Backend(format!("failed to read {column}: {e}")))?;
    u64::try_from(raw).map_err(|_| AccountStoreError::Backend(format!("negative {column}: {raw}")))
}

fn map_write_error(operation: &str, id: AccountId, err: sqlx::Error) -> AccountStoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23514") {
            return AccountStoreError::NegativeBalance(id);
        }
    }
    map_sqlx_error(operation, err)
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> AccountStoreError {
    match err {
        sqlx::Error::Database(db_err) => AccountStoreError::Backend(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            AccountStoreError::Backend(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            AccountStoreError::Backend(format!("connection pool timed out in {operation}"))
        }
        other => AccountStoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}
