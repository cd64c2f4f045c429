//! Wallet service: wiring of store, coordinator, tokens and reconciler.
//!
//! This is the boundary a transport layer calls into. It authenticates the
//! caller once and hands only the verified account id to the transfer core.

pub mod errors;
pub mod wallet;

pub use errors::ServiceError;
pub use wallet::{OpenedAccount, SharedQueue, SharedStore, WalletService, build_service};
