//! Account store boundary.
//!
//! The store exclusively owns persisted account state. It never hands out a
//! mutable balance: every write is a compare-and-swap against the version the
//! caller last observed.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryAccountStore;
pub use postgres::PostgresAccountStore;
pub use r#trait::{AccountStore, AccountStoreError};
