use serde_json::json;
use thiserror::Error;

use wallet_auth::AuthError;
use wallet_core::AccountId;
use wallet_infra::{AccountStoreError, ReconciliationError};

/// Errors of the service boundary (everything except transfer outcomes,
/// which are always reported through a receipt).
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("opening balance must not be negative (got {0})")]
    InvalidOpeningBalance(i64),

    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error(transparent)]
    Store(AccountStoreError),

    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),
}

impl From<AccountStoreError> for ServiceError {
    fn from(err: AccountStoreError) -> Self {
        match err {
            AccountStoreError::NotFound(id) => ServiceError::AccountNotFound(id),
            other => ServiceError::Store(other),
        }
    }
}

impl ServiceError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Unauthorized(_) => "unauthorized",
            ServiceError::InvalidOpeningBalance(_) => "validation_error",
            ServiceError::AccountNotFound(_) => "not_found",
            ServiceError::Timeout { .. } => "timeout",
            ServiceError::Store(_) => "store_error",
            ServiceError::Reconciliation(_) => "reconciliation_error",
        }
    }

    /// `{"error": code, "message": ...}` body for a transport layer.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "error": self.code(),
            "message": self.to_string(),
        })
    }
}
