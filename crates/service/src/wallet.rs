use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use wallet_auth::{Hs256JwtValidator, authenticate};
use wallet_core::AccountId;
use wallet_infra::{
    AccountStore, InMemoryAccountStore, InMemoryReconciliationQueue, PostgresAccountStore,
    ReconciliationEntry, ReconciliationQueue, Reconciler, ReconcilerConfig,
    TransactionCoordinator, WalletConfig,
};
use wallet_ledger::{Account, TransferReceipt};

use crate::errors::ServiceError;

pub type SharedStore = Arc<dyn AccountStore>;
pub type SharedQueue = Arc<dyn ReconciliationQueue>;

/// A newly opened account together with a token to act as it.
#[derive(Debug, Clone, Serialize)]
pub struct OpenedAccount {
    pub account_id: AccountId,
    pub balance: i64,
    pub token: String,
}

/// The wallet's single entry point.
pub struct WalletService {
    coordinator: TransactionCoordinator<SharedStore, SharedQueue>,
    tokens: Hs256JwtValidator,
    token_ttl: chrono::Duration,
    store_timeout: Duration,
    reconciler_config: ReconcilerConfig,
}

impl WalletService {
    pub fn new(store: SharedStore, queue: SharedQueue, config: &WalletConfig) -> Self {
        Self {
            coordinator: TransactionCoordinator::new(store, queue, config.transfer_settings()),
            tokens: Hs256JwtValidator::new(config.jwt_secret.as_bytes()),
            token_ttl: chrono::Duration::from_std(config.token_ttl)
                .unwrap_or_else(|_| chrono::Duration::hours(1)),
            store_timeout: config.store_timeout,
            reconciler_config: config.reconciler_config(),
        }
    }

    /// Service over in-memory store and queue (tests/dev).
    pub fn in_memory(config: &WalletConfig) -> Self {
        Self::new(
            Arc::new(InMemoryAccountStore::new()),
            Arc::new(InMemoryReconciliationQueue::new()),
            config,
        )
    }

    pub fn store(&self) -> &SharedStore {
        self.coordinator.store()
    }

    pub fn queue(&self) -> &SharedQueue {
        self.coordinator.queue()
    }

    /// Open an account with `initial_balance` and issue a token for it.
    #[instrument(skip(self), err)]
    pub async fn open_account(&self, initial_balance: i64) -> Result<OpenedAccount, ServiceError> {
        let account = Account::open(AccountId::new(), initial_balance)
            .map_err(|_| ServiceError::InvalidOpeningBalance(initial_balance))?;

        let account = tokio::time::timeout(self.store_timeout, self.store().open(account))
            .await
            .map_err(|_| ServiceError::Timeout {
                operation: "open_account",
            })??;
        let token = self.issue_token(account.account_id())?;

        info!(account_id = %account.account_id(), "account opened");
        Ok(OpenedAccount {
            account_id: account.account_id(),
            balance: account.balance(),
            token,
        })
    }

    /// Sign a token whose subject is `account_id`.
    pub fn issue_token(&self, account_id: AccountId) -> Result<String, ServiceError> {
        Ok(self.tokens.issue(account_id, Utc::now(), self.token_ttl)?)
    }

    /// Resolve an `Authorization` header value to the calling account.
    pub fn authenticate(&self, authorization: &str) -> Result<AccountId, ServiceError> {
        Ok(authenticate(&self.tokens, authorization, Utc::now())?)
    }

    pub async fn balance(&self, account_id: AccountId) -> Result<Account, ServiceError> {
        tokio::time::timeout(self.store_timeout, self.store().get(account_id))
            .await
            .map_err(|_| ServiceError::Timeout { operation: "balance" })?
            .map_err(ServiceError::from)
    }

    /// Transfer on behalf of an already verified caller.
    pub async fn submit_transfer(
        &self,
        caller: AccountId,
        receiver: AccountId,
        amount: i64,
        cancel: &CancellationToken,
    ) -> TransferReceipt {
        self.coordinator
            .submit_transfer(caller, receiver, amount, cancel)
            .await
    }

    /// Authenticate the bearer token, then transfer as its subject.
    pub async fn submit_transfer_with_token(
        &self,
        authorization: &str,
        receiver: AccountId,
        amount: i64,
        cancel: &CancellationToken,
    ) -> Result<TransferReceipt, ServiceError> {
        let caller = self.authenticate(authorization)?;
        Ok(self.submit_transfer(caller, receiver, amount, cancel).await)
    }

    /// Transfers still waiting for their credit.
    pub fn pending_reconciliations(&self, limit: usize) -> Result<Vec<ReconciliationEntry>, ServiceError> {
        Ok(self.queue().pending(limit)?)
    }

    /// Transfers whose outcome is unknown and that wait for an operator.
    pub fn entries_needing_review(&self, limit: usize) -> Result<Vec<ReconciliationEntry>, ServiceError> {
        Ok(self.queue().needing_review(limit)?)
    }

    /// A reconciler over this service's store and queue.
    pub fn reconciler(&self) -> Reconciler<SharedStore, SharedQueue> {
        Reconciler::new(
            self.store().clone(),
            self.queue().clone(),
            self.reconciler_config.clone(),
        )
    }
}

/// Build the service from configuration: Postgres when `DATABASE_URL` is set,
/// in-memory otherwise.
pub async fn build_service(config: &WalletConfig) -> Result<WalletService, ServiceError> {
    let store: SharedStore = match &config.database_url {
        Some(url) => {
            let store = PostgresAccountStore::connect(url).await?;
            store.ensure_schema().await?;
            info!("using postgres account store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; balances are kept in memory only");
            Arc::new(InMemoryAccountStore::new())
        }
    };

    Ok(WalletService::new(
        store,
        Arc::new(InMemoryReconciliationQueue::new()),
        config,
    ))
}
