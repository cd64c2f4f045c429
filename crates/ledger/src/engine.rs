//! Transfer rules: request checks and balance planning.
//!
//! These functions decide *whether* a transfer may happen and *what* the two
//! balances become. They never write anything; the caller presents the
//! resulting [`BalanceUpdate`]s to the account store.

use serde::{Deserialize, Serialize};

use wallet_core::{AccountId, ExpectedVersion};

use crate::account::Account;
use crate::transfer::{Amount, RejectReason};

/// Conditional write of one account's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceUpdate {
    pub account_id: AccountId,
    pub expected_version: ExpectedVersion,
    pub new_balance: i64,
}

/// The two writes that make up a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPlan {
    pub amount: Amount,
    pub debit: BalanceUpdate,
    pub credit: BalanceUpdate,
}

impl TransferPlan {
    /// Both writes, ordered by ascending account id.
    pub fn in_lock_order(&self) -> [BalanceUpdate; 2] {
        if self.debit.account_id <= self.credit.account_id {
            [self.debit, self.credit]
        } else {
            [self.credit, self.debit]
        }
    }
}

/// The fixed order in which two accounts are touched: lowest id first.
pub fn lock_order(a: AccountId, b: AccountId) -> (AccountId, AccountId) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Checks that need no account state (rules 1 and 2, in that order).
pub fn check_request(
    sender_id: AccountId,
    receiver_id: AccountId,
    amount: i64,
) -> Result<Amount, RejectReason> {
    if sender_id == receiver_id {
        return Err(RejectReason::SameAccount);
    }
    Amount::new(amount)
}

/// Plan a transfer against the observed account snapshots (rule 4).
///
/// The snapshots carry the version tokens the writes will be conditional on.
pub fn plan_transfer(
    sender: &Account,
    receiver: &Account,
    amount: Amount,
) -> Result<TransferPlan, RejectReason> {
    if sender.account_id() == receiver.account_id() {
        return Err(RejectReason::SameAccount);
    }
    if sender.balance() < amount.get() {
        return Err(RejectReason::InsufficientFunds);
    }

    let debited = sender.balance() - amount.get();
    let credited = receiver
        .balance()
        .checked_add(amount.get())
        .ok_or(RejectReason::InvalidAmount)?;

    Ok(TransferPlan {
        amount,
        debit: BalanceUpdate {
            account_id: sender.account_id(),
            expected_version: sender.expected_version(),
            new_balance: debited,
        },
        credit: BalanceUpdate {
            account_id: receiver.account_id(),
            expected_version: receiver.expected_version(),
            new_balance: credited,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use wallet_core::Versioned;

    fn account(balance: i64) -> Account {
        Account::open(AccountId::new(), balance).unwrap()
    }

    #[test]
    fn same_account_is_checked_before_amount() {
        let id = AccountId::new();
        assert_eq!(check_request(id, id, -3), Err(RejectReason::SameAccount));
        assert_eq!(check_request(id, id, 10), Err(RejectReason::SameAccount));
    }

    #[test]
    fn non_positive_amount_is_invalid() {
        let (a, b) = (AccountId::new(), AccountId::new());
        assert_eq!(check_request(a, b, 0), Err(RejectReason::InvalidAmount));
        assert_eq!(check_request(a, b, -1), Err(RejectReason::InvalidAmount));
    }

    #[test]
    fn insufficient_funds_is_rejected() {
        let sender = account(9);
        let receiver = account(0);
        let amount = Amount::new(10).unwrap();

        assert_eq!(
            plan_transfer(&sender, &receiver, amount),
            Err(RejectReason::InsufficientFunds)
        );
    }

    #[test]
    fn exact_balance_can_be_sent() {
        let sender = account(10);
        let receiver = account(5);

        let plan = plan_transfer(&sender, &receiver, Amount::new(10).unwrap()).unwrap();

        assert_eq!(plan.debit.new_balance, 0);
        assert_eq!(plan.credit.new_balance, 15);
        assert_eq!(plan.debit.expected_version.value(), sender.version());
        assert_eq!(plan.credit.expected_version.value(), receiver.version());
    }

    #[test]
    fn receiver_overflow_is_an_invalid_amount() {
        let sender = account(10);
        let receiver = account(i64::MAX);

        assert_eq!(
            plan_transfer(&sender, &receiver, Amount::new(1).unwrap()),
            Err(RejectReason::InvalidAmount)
        );
    }

    #[test]
    fn lock_order_ignores_direction() {
        let (a, b) = (AccountId::new(), AccountId::new());
        assert_eq!(lock_order(a, b), lock_order(b, a));

        let sender = account(10);
        let receiver = account(0);
        let forward = plan_transfer(&sender, &receiver, Amount::new(1).unwrap()).unwrap();
        let ids = forward.in_lock_order().map(|u| u.account_id);
        assert!(ids[0] < ids[1]);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: applying any sequence of planned transfers back and forth
        /// between two accounts conserves the total and never goes negative.
        #[test]
        fn planned_transfers_conserve_money(
            opening in (0i64..1_000_000, 0i64..1_000_000),
            moves in prop::collection::vec((any::<bool>(), 1i64..500_000), 1..40)
        ) {
            let mut a = account(opening.0);
            let mut b = account(opening.1);
            let total = opening.0 + opening.1;

            for (a_to_b, value) in moves {
                let amount = Amount::new(value).unwrap();
                let (sender, receiver) = if a_to_b { (&mut a, &mut b) } else { (&mut b, &mut a) };

                match plan_transfer(sender, receiver, amount) {
                    Ok(plan) => {
                        sender.write_balance(plan.debit.expected_version, plan.debit.new_balance).unwrap();
                        receiver.write_balance(plan.credit.expected_version, plan.credit.new_balance).unwrap();
                    }
                    Err(reason) => {
                        prop_assert_eq!(reason, RejectReason::InsufficientFunds);
                        prop_assert!(sender.balance() < value);
                    }
                }

                prop_assert!(a.balance() >= 0);
                prop_assert!(b.balance() >= 0);
                prop_assert_eq!(a.balance() + b.balance(), total);
            }
        }
    }
}
