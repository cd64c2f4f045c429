use std::time::Duration;

use wallet_core::AccountId;
use wallet_ledger::{Account, Amount, RejectReason, TransferPlan, lock_order, plan_transfer};

use super::{TransferError, bounded};
use crate::account_store::AccountStore;

/// Update intents of one attempt: both account snapshots, read lowest id first.
///
/// The snapshots carry the version tokens the writes are conditional on.
#[derive(Debug, Clone)]
pub(crate) struct IntentSet {
    sender: Account,
    receiver: Account,
}

impl IntentSet {
    pub(crate) async fn acquire<S>(
        store: &S,
        sender_id: AccountId,
        receiver_id: AccountId,
        timeout: Duration,
    ) -> Result<Self, TransferError>
    where
        S: AccountStore + ?Sized,
    {
        let (first, second) = lock_order(sender_id, receiver_id);
        let first = bounded("get_account", timeout, store.get(first)).await?;
        let second = bounded("get_account", timeout, store.get(second)).await?;

        let (sender, receiver) = if first.account_id() == sender_id {
            (first, second)
        } else {
            (second, first)
        };
        Ok(Self { sender, receiver })
    }

    pub(crate) fn plan(&self, amount: Amount) -> Result<TransferPlan, RejectReason> {
        plan_transfer(&self.sender, &self.receiver, amount)
    }
}
