//! Transfer lifecycle: amount, reasons, state machine, receipts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use wallet_core::{AccountId, DomainError, DomainResult, TransferId, ValueObject};

/// A strictly positive amount in the smallest currency unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

impl Amount {
    pub fn new(value: i64) -> Result<Self, RejectReason> {
        if value > 0 {
            Ok(Self(value))
        } else {
            Err(RejectReason::InvalidAmount)
        }
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl ValueObject for Amount {}

impl TryFrom<i64> for Amount {
    type Error = RejectReason;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for i64 {
    fn from(value: Amount) -> Self {
        value.0
    }
}

impl core::fmt::Display for Amount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// How a caller should treat a non-committed outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Nothing was mutated; report directly.
    Validation,
    /// Transient; safe to retry, no durable partial state.
    Contention,
    /// Partially applied; needs reconciliation. Alert, do not retry blindly.
    Reconciliation,
}

/// Why a transfer was rejected. A rejected transfer never mutated anything.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    #[error("sender and receiver are the same account")]
    SameAccount,
    #[error("amount must be a positive integer")]
    InvalidAmount,
    #[error("account not found")]
    AccountNotFound,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("too much contention on the accounts involved")]
    Contention,
    #[error("account store did not answer in time")]
    Timeout,
    #[error("request was cancelled")]
    Cancelled,
    #[error("account store unavailable")]
    Unavailable,
}

impl RejectReason {
    pub fn kind(self) -> ErrorKind {
        match self {
            RejectReason::SameAccount
            | RejectReason::InvalidAmount
            | RejectReason::AccountNotFound
            | RejectReason::InsufficientFunds => ErrorKind::Validation,
            RejectReason::Contention
            | RejectReason::Timeout
            | RejectReason::Cancelled
            | RejectReason::Unavailable => ErrorKind::Contention,
        }
    }
}

/// Coarse lifecycle status of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Committed,
    Rejected(RejectReason),
    FailedNeedsReconciliation,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::Pending)
    }
}

/// Fine-grained phase of a transfer.
///
/// ```text
/// Received → Validating → Locking → Mutating → Committed
///     │           │          │         ├──→ FailedNeedsReconciliation
///     └───────────┴──────────┴─────────┴──→ Rejected (only before any write)
///                             Mutating ──→ Validating (retry, only before any write)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Received,
    Validating,
    Locking,
    Mutating,
    Committed,
    Rejected,
    FailedNeedsReconciliation,
}

impl TransferState {
    pub fn can_transition_to(self, next: TransferState) -> bool {
        use TransferState::*;
        matches!(
            (self, next),
            (Received, Validating)
                | (Received, Rejected)
                | (Validating, Locking)
                | (Validating, Rejected)
                | (Locking, Mutating)
                | (Locking, Rejected)
                | (Mutating, Validating)
                | (Mutating, Rejected)
                | (Mutating, Committed)
                | (Mutating, FailedNeedsReconciliation)
        )
    }
}

/// One transfer request and its progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    id: TransferId,
    sender_id: AccountId,
    receiver_id: AccountId,
    /// Requested amount as received (validated separately).
    amount: i64,
    state: TransferState,
    status: TransferStatus,
    attempts: u32,
    debit_applied: bool,
    detail: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl Transfer {
    /// A transfer that just arrived. Status is `Pending`.
    pub fn received(sender_id: AccountId, receiver_id: AccountId, amount: i64) -> Self {
        Self {
            id: TransferId::new(),
            sender_id,
            receiver_id,
            amount,
            state: TransferState::Received,
            status: TransferStatus::Pending,
            attempts: 0,
            debit_applied: false,
            detail: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn sender_id(&self) -> AccountId {
        self.sender_id
    }

    pub fn receiver_id(&self) -> AccountId {
        self.receiver_id
    }

    pub fn requested_amount(&self) -> i64 {
        self.amount
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether any balance has been written for this transfer.
    pub fn mutation_started(&self) -> bool {
        self.debit_applied
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Start a (new) validate-then-mutate attempt.
    pub fn begin_attempt(&mut self) -> DomainResult<()> {
        if self.debit_applied {
            return Err(DomainError::invariant(
                "cannot restart validation after a balance was written",
            ));
        }
        self.transition(TransferState::Validating)?;
        self.attempts += 1;
        Ok(())
    }

    pub fn enter_locking(&mut self) -> DomainResult<()> {
        self.transition(TransferState::Locking)
    }

    pub fn enter_mutating(&mut self) -> DomainResult<()> {
        self.transition(TransferState::Mutating)
    }

    /// Record that the sender's debit has been written.
    pub fn mark_debit_applied(&mut self) -> DomainResult<()> {
        if self.state != TransferState::Mutating {
            return Err(DomainError::invariant("debit recorded outside of Mutating"));
        }
        self.debit_applied = true;
        Ok(())
    }

    pub fn commit(&mut self) -> DomainResult<()> {
        self.transition(TransferState::Committed)?;
        self.debit_applied = true;
        self.finish(TransferStatus::Committed);
        Ok(())
    }

    /// Reject the transfer. Refused once any balance has been written.
    pub fn reject(&mut self, reason: RejectReason) -> DomainResult<()> {
        if self.debit_applied {
            return Err(DomainError::invariant(format!(
                "cannot reject transfer {} ({reason}) after the debit was written",
                self.id
            )));
        }
        self.transition(TransferState::Rejected)?;
        self.finish(TransferStatus::Rejected(reason));
        Ok(())
    }

    pub fn fail_needs_reconciliation(&mut self, detail: impl Into<String>) -> DomainResult<()> {
        self.transition(TransferState::FailedNeedsReconciliation)?;
        self.detail = Some(detail.into());
        self.finish(TransferStatus::FailedNeedsReconciliation);
        Ok(())
    }

    pub fn receipt(&self) -> TransferReceipt {
        TransferReceipt::from(self)
    }

    fn transition(&mut self, next: TransferState) -> DomainResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(DomainError::invariant(format!(
                "transfer {} cannot move from {:?} to {next:?}",
                self.id, self.state
            )));
        }
        self.state = next;
        Ok(())
    }

    fn finish(&mut self, status: TransferStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

/// Terminal status as reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Committed,
    Rejected,
    FailedNeedsReconciliation,
}

/// `{status, reason?}` answer for a submitted transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transfer_id: TransferId,
    pub status: ReceiptStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TransferReceipt {
    pub fn is_committed(&self) -> bool {
        self.status == ReceiptStatus::Committed
    }

    /// Error class of a non-committed receipt.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self.status {
            ReceiptStatus::Committed => None,
            ReceiptStatus::Rejected => self.reason.map(RejectReason::kind),
            ReceiptStatus::FailedNeedsReconciliation => Some(ErrorKind::Reconciliation),
        }
    }
}

impl From<&Transfer> for TransferReceipt {
    fn from(transfer: &Transfer) -> Self {
        let (status, reason) = match transfer.status {
            TransferStatus::Committed => (ReceiptStatus::Committed, None),
            TransferStatus::Rejected(reason) => (ReceiptStatus::Rejected, Some(reason)),
            TransferStatus::FailedNeedsReconciliation => {
                (ReceiptStatus::FailedNeedsReconciliation, None)
            }
            // Unfinished: nothing says the writes did not land.
            TransferStatus::Pending => (ReceiptStatus::FailedNeedsReconciliation, None),
        };
        Self {
            transfer_id: transfer.id,
            status,
            reason,
            detail: transfer.detail.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer() -> Transfer {
        Transfer::received(AccountId::new(), AccountId::new(), 10)
    }

    fn drive_to_mutating(t: &mut Transfer) {
        t.begin_attempt().unwrap();
        t.enter_locking().unwrap();
        t.enter_mutating().unwrap();
    }

    #[test]
    fn amount_must_be_positive() {
        assert_eq!(Amount::new(0), Err(RejectReason::InvalidAmount));
        assert_eq!(Amount::new(-5), Err(RejectReason::InvalidAmount));
        assert_eq!(Amount::new(1).unwrap().get(), 1);
    }

    #[test]
    fn amount_deserialization_validates() {
        assert!(serde_json::from_str::<Amount>("0").is_err());
        assert_eq!(serde_json::from_str::<Amount>("42").unwrap().get(), 42);
    }

    #[test]
    fn happy_path_reaches_committed() {
        let mut t = transfer();
        drive_to_mutating(&mut t);
        t.mark_debit_applied().unwrap();
        t.commit().unwrap();

        assert_eq!(t.state(), TransferState::Committed);
        assert_eq!(t.status(), TransferStatus::Committed);
        assert_eq!(t.attempts(), 1);
        assert!(t.completed_at().is_some());
        assert!(t.receipt().is_committed());
    }

    #[test]
    fn conflict_before_any_write_can_retry() {
        let mut t = transfer();
        drive_to_mutating(&mut t);
        t.begin_attempt().unwrap();

        assert_eq!(t.state(), TransferState::Validating);
        assert_eq!(t.attempts(), 2);
    }

    #[test]
    fn no_retry_or_reject_after_debit() {
        let mut t = transfer();
        drive_to_mutating(&mut t);
        t.mark_debit_applied().unwrap();

        assert!(t.begin_attempt().is_err());
        assert!(t.reject(RejectReason::Cancelled).is_err());
        assert_eq!(t.status(), TransferStatus::Pending);

        t.fail_needs_reconciliation("credit retries exhausted").unwrap();
        let receipt = t.receipt();
        assert_eq!(receipt.status, ReceiptStatus::FailedNeedsReconciliation);
        assert_eq!(receipt.error_kind(), Some(ErrorKind::Reconciliation));
        assert_eq!(receipt.detail.as_deref(), Some("credit retries exhausted"));
    }

    #[test]
    fn unfinished_transfer_is_never_reported_as_rejected() {
        let mut t = transfer();
        drive_to_mutating(&mut t);

        let receipt = t.receipt();
        assert_eq!(receipt.status, ReceiptStatus::FailedNeedsReconciliation);
        assert_eq!(receipt.reason, None);
    }

    #[test]
    fn reconciliation_requires_mutating() {
        let mut t = transfer();
        t.begin_attempt().unwrap();
        assert!(t.fail_needs_reconciliation("nope").is_err());
    }

    #[test]
    fn rejected_receipt_carries_reason_and_kind() {
        let mut t = transfer();
        t.begin_attempt().unwrap();
        t.reject(RejectReason::InsufficientFunds).unwrap();

        let receipt = t.receipt();
        assert_eq!(receipt.status, ReceiptStatus::Rejected);
        assert_eq!(receipt.reason, Some(RejectReason::InsufficientFunds));
        assert_eq!(receipt.error_kind(), Some(ErrorKind::Validation));
    }

    #[test]
    fn receipt_json_shape() {
        let mut t = transfer();
        t.begin_attempt().unwrap();
        t.reject(RejectReason::SameAccount).unwrap();

        let json = serde_json::to_value(t.receipt()).unwrap();
        assert_eq!(json["status"], "rejected");
        assert_eq!(json["reason"], "same_account");
        assert!(json.get("detail").is_none());
    }

    #[test]
    fn reason_kinds() {
        assert_eq!(RejectReason::Timeout.kind(), ErrorKind::Contention);
        assert_eq!(RejectReason::Contention.kind(), ErrorKind::Contention);
        assert_eq!(RejectReason::AccountNotFound.kind(), ErrorKind::Validation);
    }
}
