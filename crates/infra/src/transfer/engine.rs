use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use wallet_ledger::{Amount, RejectReason, Transfer, check_request};

use super::commit::{CommitError, CommitReport, commit_atomic, commit_compensating};
use super::intents::IntentSet;
use super::{TransferError, TransferSettings};
use crate::account_store::AccountStore;

/// How one run of the validate-then-mutate loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    Committed(CommitReport),
    /// Nothing was written.
    Rejected(RejectReason),
    /// A balance was (or may have been) written and the transfer could not
    /// be finished.
    NeedsReconciliation {
        amount: Amount,
        detail: String,
        credit_attempts: u32,
        /// Whether the writes landed is unknown, so the credit must not be
        /// re-driven automatically.
        needs_review: bool,
    },
}

/// Validates and applies transfers.
///
/// Holds no account state: every call gets the store handle to work against.
/// On a version conflict before any write the whole sequence is re-run
/// against fresh reads, with backoff, until the retry policy runs out.
#[derive(Debug, Clone, Default)]
pub struct LedgerEngine {
    settings: TransferSettings,
}

impl LedgerEngine {
    pub fn new(settings: TransferSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// Drive `transfer` until it can be given a terminal status.
    ///
    /// `cancel` is honoured up to the first write. `Err` is only returned when
    /// the transfer's own state machine refuses a step before any write.
    pub async fn execute<S>(
        &self,
        store: &S,
        transfer: &mut Transfer,
        cancel: &CancellationToken,
    ) -> Result<EngineOutcome, TransferError>
    where
        S: AccountStore + ?Sized,
    {
        let policy = &self.settings.retry;
        let timeout = self.settings.store_timeout;

        loop {
            transfer.begin_attempt()?;

            let amount = match check_request(
                transfer.sender_id(),
                transfer.receiver_id(),
                transfer.requested_amount(),
            ) {
                Ok(amount) => amount,
                Err(reason) => return Ok(EngineOutcome::Rejected(reason)),
            };
            if cancel.is_cancelled() {
                return Ok(EngineOutcome::Rejected(RejectReason::Cancelled));
            }

            transfer.enter_locking()?;
            let intents = match IntentSet::acquire(
                store,
                transfer.sender_id(),
                transfer.receiver_id(),
                timeout,
            )
            .await
            {
                Ok(intents) => intents,
                Err(err) => return Ok(EngineOutcome::Rejected(err.reject_reason())),
            };
            let plan = match intents.plan(amount) {
                Ok(plan) => plan,
                Err(reason) => return Ok(EngineOutcome::Rejected(reason)),
            };
            if cancel.is_cancelled() {
                return Ok(EngineOutcome::Rejected(RejectReason::Cancelled));
            }

            transfer.enter_mutating()?;
            let committed = if store.supports_atomic_batch() {
                commit_atomic(store, &plan, timeout).await
            } else {
                commit_compensating(store, &plan, &self.settings).await
            };

            match committed {
                Ok(report) => return Ok(EngineOutcome::Committed(report)),
                Err(CommitError::NotApplied(err)) if err.is_conflict() => {
                    if !policy.should_retry(transfer.attempts()) {
                        warn!(
                            transfer_id = %transfer.id(),
                            attempts = transfer.attempts(),
                            "giving up after repeated version conflicts"
                        );
                        return Ok(EngineOutcome::Rejected(RejectReason::Contention));
                    }

                    let delay = policy.delay_for_attempt(transfer.attempts());
                    debug!(
                        transfer_id = %transfer.id(),
                        attempt = transfer.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "version conflict, retrying transfer"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Ok(EngineOutcome::Rejected(RejectReason::Cancelled));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(CommitError::NotApplied(err)) => {
                    return Ok(EngineOutcome::Rejected(err.reject_reason()));
                }
                Err(CommitError::CreditFailed {
                    last_error,
                    attempts,
                }) => {
                    record_write(transfer);
                    return Ok(EngineOutcome::NeedsReconciliation {
                        amount,
                        detail: format!(
                            "debit of {amount} from {} applied; credit to {} failed after {attempts} attempts: {last_error}",
                            transfer.sender_id(),
                            transfer.receiver_id(),
                        ),
                        credit_attempts: attempts,
                        needs_review: false,
                    });
                }
                Err(CommitError::OutcomeUnknown {
                    last_error,
                    attempts,
                }) => {
                    // A write may have landed; the transfer can no longer be rejected.
                    record_write(transfer);
                    return Ok(EngineOutcome::NeedsReconciliation {
                        amount,
                        detail: format!(
                            "transfer of {amount} from {} to {} has an unknown outcome: {last_error}",
                            transfer.sender_id(),
                            transfer.receiver_id(),
                        ),
                        credit_attempts: attempts,
                        needs_review: true,
                    });
                }
            }
        }
    }
}

fn record_write(transfer: &mut Transfer) {
    if let Err(err) = transfer.mark_debit_applied() {
        warn!(transfer_id = %transfer.id(), error = %err, "could not record debit on transfer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account_store::InMemoryAccountStore;
    use crate::retry::RetryPolicy;
    use wallet_core::AccountId;
    use wallet_ledger::{Account, TransferState};

    async fn open(store: &InMemoryAccountStore, balance: i64) -> AccountId {
        store
            .open(Account::open(AccountId::new(), balance).unwrap())
            .await
            .unwrap()
            .account_id()
    }

    #[tokio::test]
    async fn commits_and_moves_money() {
        let store = InMemoryAccountStore::new();
        let (a, b) = (open(&store, 100).await, open(&store, 0).await);
        let mut transfer = Transfer::received(a, b, 40);

        let outcome = LedgerEngine::default()
            .execute(&store, &mut transfer, &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, EngineOutcome::Committed(_)));
        assert_eq!(transfer.state(), TransferState::Mutating);
        assert_eq!(store.get(a).await.unwrap().balance(), 60);
        assert_eq!(store.get(b).await.unwrap().balance(), 40);
    }

    #[tokio::test]
    async fn validation_order_is_same_account_then_amount_then_existence_then_funds() {
        let store = InMemoryAccountStore::new();
        let a = open(&store, 5).await;
        let b = open(&store, 5).await;
        let engine = LedgerEngine::default();
        let cancel = CancellationToken::new();

        let cases = [
            (a, a, -1, RejectReason::SameAccount),
            (a, AccountId::new(), 0, RejectReason::InvalidAmount),
            (a, AccountId::new(), 1, RejectReason::AccountNotFound),
            (a, b, 6, RejectReason::InsufficientFunds),
        ];

        for (sender, receiver, amount, expected) in cases {
            let mut transfer = Transfer::received(sender, receiver, amount);
            let outcome = engine.execute(&store, &mut transfer, &cancel).await.unwrap();
            assert_eq!(outcome, EngineOutcome::Rejected(expected));
        }
        assert_eq!(store.total_balance().unwrap(), 10);
    }

    #[tokio::test]
    async fn cancelled_before_mutation_is_rejected() {
        let store = InMemoryAccountStore::new();
        let (a, b) = (open(&store, 100).await, open(&store, 0).await);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut transfer = Transfer::received(a, b, 40);
        let outcome = LedgerEngine::default()
            .execute(&store, &mut transfer, &cancel)
            .await
            .unwrap();

        assert_eq!(outcome, EngineOutcome::Rejected(RejectReason::Cancelled));
        assert_eq!(store.get(a).await.unwrap().balance(), 100);
    }

    #[tokio::test]
    async fn fallback_path_commits_without_batches() {
        let store = InMemoryAccountStore::without_atomic_batches();
        let (a, b) = (open(&store, 10).await, open(&store, 3).await);
        let mut transfer = Transfer::received(b, a, 3);

        let engine = LedgerEngine::new(TransferSettings::default().with_retry(RetryPolicy::no_retry()));
        let outcome = engine
            .execute(&store, &mut transfer, &CancellationToken::new())
            .await
            .unwrap();

        match outcome {
            EngineOutcome::Committed(report) => assert!(!report.atomic),
            other => panic!("expected commit, got {other:?}"),
        }
        assert_eq!(store.get(a).await.unwrap().balance(), 13);
        assert_eq!(store.get(b).await.unwrap().balance(), 0);
    }
}
