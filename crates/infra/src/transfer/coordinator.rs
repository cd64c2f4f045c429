use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use wallet_core::AccountId;
use wallet_ledger::{Amount, ErrorKind, RejectReason, Transfer, TransferReceipt};

use super::engine::{EngineOutcome, LedgerEngine};
use super::TransferSettings;
use crate::account_store::AccountStore;
use crate::reconciliation::{ReconciliationEntry, ReconciliationQueue};

/// Entry point for transfer requests.
///
/// Concurrent requests against the same accounts are sequenced by the store's
/// version tokens, with intents always taken lowest account id first; requests
/// on disjoint accounts never wait on each other. Transfers whose debit was
/// written but whose credit never landed are handed to the reconciliation
/// queue.
pub struct TransactionCoordinator<S, Q> {
    store: S,
    queue: Q,
    engine: LedgerEngine,
}

impl<S, Q> TransactionCoordinator<S, Q>
where
    S: AccountStore,
    Q: ReconciliationQueue,
{
    pub fn new(store: S, queue: Q, settings: TransferSettings) -> Self {
        Self {
            store,
            queue,
            engine: LedgerEngine::new(settings),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn settings(&self) -> &TransferSettings {
        self.engine.settings()
    }

    /// Move `amount` from `caller` to `receiver`.
    ///
    /// `caller` must already be authenticated. Always returns a terminal
    /// receipt; `cancel` is only honoured until the first balance write.
    #[instrument(
        skip(self, caller, receiver, cancel),
        fields(
            sender_id = %caller,
            receiver_id = %receiver,
            transfer_id = tracing::field::Empty
        )
    )]
    pub async fn submit_transfer(
        &self,
        caller: AccountId,
        receiver: AccountId,
        amount: i64,
        cancel: &CancellationToken,
    ) -> TransferReceipt {
        let mut transfer = Transfer::received(caller, receiver, amount);
        tracing::Span::current().record("transfer_id", tracing::field::display(transfer.id()));

        let outcome = match self.engine.execute(&self.store, &mut transfer, cancel).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(error = %err, "transfer pipeline failed");
                self.outcome_after_failure(&transfer, err.to_string())
            }
        };

        self.finish(&mut transfer, outcome);
        transfer.receipt()
    }

    fn outcome_after_failure(&self, transfer: &Transfer, detail: String) -> EngineOutcome {
        match Amount::new(transfer.requested_amount()) {
            Ok(amount) if transfer.mutation_started() => EngineOutcome::NeedsReconciliation {
                amount,
                detail,
                credit_attempts: 0,
                needs_review: true,
            },
            _ => EngineOutcome::Rejected(RejectReason::Unavailable),
        }
    }

    /// Record the outcome on `transfer`. The transfer never stays `Pending`
    /// without a reconciliation entry.
    fn finish(&self, transfer: &mut Transfer, outcome: EngineOutcome) {
        match outcome {
            EngineOutcome::Committed(report) => {
                if let Err(err) = transfer.commit() {
                    error!(error = %err, "failed to record commit");
                    self.escalate_unrecorded(transfer, format!("committed but not recorded: {err}"));
                    return;
                }
                info!(
                    amount = transfer.requested_amount(),
                    attempts = transfer.attempts(),
                    atomic = report.atomic,
                    credit_attempts = report.credit_attempts,
                    "transfer committed"
                );
            }
            EngineOutcome::Rejected(reason) => {
                if let Err(err) = transfer.reject(reason) {
                    error!(error = %err, %reason, "failed to record rejection");
                    self.escalate_unrecorded(transfer, format!("rejected ({reason}) but not recorded: {err}"));
                    return;
                }
                match reason.kind() {
                    ErrorKind::Validation => info!(%reason, "transfer rejected"),
                    _ => warn!(%reason, attempts = transfer.attempts(), "transfer rejected"),
                }
            }
            EngineOutcome::NeedsReconciliation {
                amount,
                detail,
                credit_attempts,
                needs_review,
            } => self.escalate(transfer, amount, detail, credit_attempts, needs_review),
        }
    }

    fn escalate_unrecorded(&self, transfer: &mut Transfer, detail: String) {
        match Amount::new(transfer.requested_amount()) {
            Ok(amount) => self.escalate(transfer, amount, detail, 0, true),
            Err(_) => error!(detail = %detail, "unrecorded transfer has no valid amount"),
        }
    }

    fn escalate(
        &self,
        transfer: &mut Transfer,
        amount: Amount,
        detail: String,
        credit_attempts: u32,
        needs_review: bool,
    ) {
        if let Err(err) = transfer.fail_needs_reconciliation(detail.clone()) {
            error!(error = %err, "failed to record reconciliation state");
        }
        error!(
            amount = amount.get(),
            credit_attempts,
            needs_review,
            detail = %detail,
            "transfer needs reconciliation"
        );

        let mut entry = ReconciliationEntry::new(
            transfer.id(),
            transfer.sender_id(),
            transfer.receiver_id(),
            amount,
            detail,
        );
        if needs_review {
            entry = entry.needing_review();
        }
        if let Err(err) = self.queue.enqueue(entry.clone()) {
            // Last resort: the log line is the only record left.
            error!(
                error = %err,
                entry = ?entry,
                "failed to queue transfer for reconciliation"
            );
        }
    }
}
