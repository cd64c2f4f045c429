//! Version tokens for optimistic concurrency control.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Anything that carries a monotonically increasing version.
pub trait Versioned {
    /// Monotonically increasing version of the entity's persisted state.
    ///
    /// Every successful mutation advances it by exactly one.
    fn version(&self) -> u64;
}

/// The version a caller last observed and now presents to the store.
///
/// Every mutation is conditional on this token: the store only writes when the
/// persisted version still equals it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpectedVersion(u64);

impl ExpectedVersion {
    pub fn new(version: u64) -> Self {
        Self(version)
    }

    /// Token for the current version of `entity`.
    pub fn of(entity: &impl Versioned) -> Self {
        Self(entity.version())
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// Version the entity will have once a write with this token succeeds.
    pub fn next(self) -> u64 {
        self.0 + 1
    }

    pub fn matches(self, actual: u64) -> bool {
        self.0 == actual
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {}, actual: {actual})",
                self.0
            )))
        }
    }
}

impl core::fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Snapshot(u64);

    impl Versioned for Snapshot {
        fn version(&self) -> u64 {
            self.0
        }
    }

    #[test]
    fn token_matches_only_its_version() {
        let token = ExpectedVersion::of(&Snapshot(3));
        assert!(token.matches(3));
        assert!(!token.matches(4));
        assert_eq!(token.next(), 4);
    }

    #[test]
    fn stale_token_is_a_conflict() {
        let err = ExpectedVersion::new(1).check(2).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }
}
