use serde::{Deserialize, Serialize};

use wallet_core::{AccountId, DomainError, DomainResult, Entity, ExpectedVersion, Versioned};

/// A wallet account as persisted by the account store.
///
/// # Invariants
/// - `balance >= 0` (smallest currency unit, never fractional).
/// - `version >= 1`; every accepted write advances it by exactly one.
/// - `id` never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    id: AccountId,
    balance: i64,
    version: u64,
}

impl Account {
    /// Version of a freshly opened account.
    pub const INITIAL_VERSION: u64 = 1;

    /// Open a new account with an opening balance.
    pub fn open(id: AccountId, opening_balance: i64) -> DomainResult<Self> {
        Self::from_parts(id, opening_balance, Self::INITIAL_VERSION)
    }

    /// Rebuild an account from persisted fields.
    pub fn from_parts(id: AccountId, balance: i64, version: u64) -> DomainResult<Self> {
        if balance < 0 {
            return Err(DomainError::invariant(format!(
                "account {id} balance must be non-negative (got {balance})"
            )));
        }
        if version < Self::INITIAL_VERSION {
            return Err(DomainError::invariant(format!(
                "account {id} version must be >= {} (got {version})",
                Self::INITIAL_VERSION
            )));
        }
        Ok(Self {
            id,
            balance,
            version,
        })
    }

    pub fn account_id(&self) -> AccountId {
        self.id
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn expected_version(&self) -> ExpectedVersion {
        ExpectedVersion::of(self)
    }

    /// Conditionally replace the balance.
    ///
    /// Succeeds only if `expected` is the current version and the new balance is
    /// non-negative. Returns the new version. On error nothing changes.
    pub fn write_balance(&mut self, expected: ExpectedVersion, new_balance: i64) -> DomainResult<u64> {
        expected.check(self.version)?;
        if new_balance < 0 {
            return Err(DomainError::invariant(format!(
                "account {} balance would become negative ({new_balance})",
                self.id
            )));
        }
        self.balance = new_balance;
        self.version += 1;
        Ok(self.version)
    }
}

impl Entity for Account {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Versioned for Account {
    fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_starts_at_initial_version() {
        let account = Account::open(AccountId::new(), 250).unwrap();
        assert_eq!(account.balance(), 250);
        assert_eq!(account.version(), Account::INITIAL_VERSION);
    }

    #[test]
    fn negative_opening_balance_is_rejected() {
        let err = Account::open(AccountId::new(), -1).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn write_with_current_version_bumps_version() {
        let mut account = Account::open(AccountId::new(), 100).unwrap();
        let token = account.expected_version();

        let new_version = account.write_balance(token, 40).unwrap();

        assert_eq!(new_version, 2);
        assert_eq!(account.balance(), 40);
        assert_eq!(account.version(), 2);
    }

    #[test]
    fn stale_write_changes_nothing() {
        let mut account = Account::open(AccountId::new(), 100).unwrap();
        let stale = account.expected_version();
        account.write_balance(stale, 90).unwrap();

        let err = account.write_balance(stale, 10).unwrap_err();

        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(account.balance(), 90);
        assert_eq!(account.version(), 2);
    }

    #[test]
    fn negative_write_changes_nothing() {
        let mut account = Account::open(AccountId::new(), 5).unwrap();
        let token = account.expected_version();

        assert!(account.write_balance(token, -1).is_err());
        assert_eq!(account.balance(), 5);
        assert_eq!(account.version(), 1);
    }
}
