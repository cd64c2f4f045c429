//! Wallet ledger (accounts, transfers, transfer rules).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns. The
//! infrastructure layer reads accounts from a store, asks this crate whether a
//! transfer is allowed and what the balances become, then writes them back.

pub mod account;
pub mod engine;
pub mod transfer;

pub use account::Account;
pub use engine::{BalanceUpdate, TransferPlan, check_request, lock_order, plan_transfer};
pub use transfer::{
    Amount, ErrorKind, ReceiptStatus, RejectReason, Transfer, TransferReceipt, TransferState,
    TransferStatus,
};
