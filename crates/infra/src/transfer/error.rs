use std::time::Duration;

use thiserror::Error;

use wallet_core::DomainError;
use wallet_ledger::RejectReason;

use crate::account_store::AccountStoreError;

/// Error raised inside the transfer pipeline.
///
/// Never leaves the coordinator: every variant is folded into a terminal
/// transfer status before a receipt is produced.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer rejected: {0}")]
    Rejected(RejectReason),

    /// A version token went stale between read and write.
    #[error("version conflict: {0}")]
    Conflict(String),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error(transparent)]
    Store(AccountStoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl From<AccountStoreError> for TransferError {
    fn from(err: AccountStoreError) -> Self {
        match err {
            AccountStoreError::NotFound(_) => TransferError::Rejected(RejectReason::AccountNotFound),
            AccountStoreError::VersionConflict { .. } => TransferError::Conflict(err.to_string()),
            AccountStoreError::NegativeBalance(_) => {
                TransferError::Rejected(RejectReason::InsufficientFunds)
            }
            other => TransferError::Store(other),
        }
    }
}

impl TransferError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, TransferError::Conflict(_))
    }

    /// A failed write whose effect on the store is unknown: the call timed out
    /// or the backend broke off. The write may still have landed.
    pub fn is_ambiguous(&self) -> bool {
        matches!(
            self,
            TransferError::Timeout { .. } | TransferError::Store(AccountStoreError::Backend(_))
        )
    }

    /// Reason reported when this error ends a transfer before any write.
    pub fn reject_reason(&self) -> RejectReason {
        match self {
            TransferError::Rejected(reason) => *reason,
            TransferError::Conflict(_) => RejectReason::Contention,
            TransferError::Timeout { .. } => RejectReason::Timeout,
            TransferError::Store(_) | TransferError::Domain(_) => RejectReason::Unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wallet_core::{AccountId, ExpectedVersion};

    #[test]
    fn store_errors_map_onto_reject_reasons() {
        let id = AccountId::new();

        let cases = [
            (AccountStoreError::NotFound(id), RejectReason::AccountNotFound),
            (
                AccountStoreError::VersionConflict {
                    account_id: id,
                    expected: ExpectedVersion::new(1),
                    actual: 2,
                },
                RejectReason::Contention,
            ),
            (AccountStoreError::NegativeBalance(id), RejectReason::InsufficientFunds),
            (
                AccountStoreError::Backend("connection reset".into()),
                RejectReason::Unavailable,
            ),
        ];

        for (store_err, expected) in cases {
            assert_eq!(TransferError::from(store_err).reject_reason(), expected);
        }
    }

    #[test]
    fn timeout_maps_to_timeout() {
        let err = TransferError::Timeout {
            operation: "get_account",
            timeout: Duration::from_millis(10),
        };
        assert_eq!(err.reject_reason(), RejectReason::Timeout);
        assert!(!err.is_conflict());
        assert!(err.is_ambiguous());
    }

    #[test]
    fn only_lost_answers_are_ambiguous() {
        let id = AccountId::new();

        assert!(TransferError::from(AccountStoreError::Backend("reset".into())).is_ambiguous());
        assert!(!TransferError::from(AccountStoreError::NotFound(id)).is_ambiguous());
        assert!(!TransferError::from(AccountStoreError::NegativeBalance(id)).is_ambiguous());
        assert!(!TransferError::from(AccountStoreError::BatchUnsupported).is_ambiguous());
    }
}
