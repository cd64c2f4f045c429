//! The two ways a planned transfer reaches the store.

use std::time::Duration;

use tracing::{debug, warn};

use wallet_core::{AccountId, Versioned};
use wallet_ledger::{Amount, BalanceUpdate, RejectReason, TransferPlan};

use super::{TransferError, TransferSettings, bounded};
use crate::account_store::AccountStore;
use crate::retry::RetryPolicy;

/// Versions written by a committed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReport {
    pub sender_version: u64,
    pub receiver_version: u64,
    /// Credit attempts made (always 1 on the atomic path).
    pub credit_attempts: u32,
    pub atomic: bool,
}

/// A commit that did not complete.
#[derive(Debug)]
pub enum CommitError {
    /// Nothing was written.
    NotApplied(TransferError),
    /// The debit was written; the credit never landed.
    CreditFailed {
        last_error: TransferError,
        attempts: u32,
    },
    /// A write's answer was lost and a re-read could not tell whether it landed.
    OutcomeUnknown {
        last_error: TransferError,
        attempts: u32,
    },
}

/// A credit that landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditOutcome {
    pub version: u64,
    pub attempts: u32,
}

/// A credit that was given up on.
#[derive(Debug)]
pub struct CreditFailure {
    pub last_error: TransferError,
    pub attempts: u32,
    /// The last credit may have landed; it must not be retried blindly.
    pub outcome_unknown: bool,
}

/// What a re-read says about a write whose answer was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteCheck {
    /// The account is at `expected + 1` holding the planned balance.
    Landed(u64),
    /// The account is still at `expected`, or someone else's write took `expected + 1`.
    NotLanded,
    /// The account moved further, or could not be read.
    Unknown,
}

/// Re-read the account behind `update` to find out whether it was written.
pub(crate) async fn check_write<S>(store: &S, update: &BalanceUpdate, timeout: Duration) -> WriteCheck
where
    S: AccountStore + ?Sized,
{
    let account = match bounded("verify_write", timeout, store.get(update.account_id)).await {
        Ok(account) => account,
        Err(err) => {
            warn!(account_id = %update.account_id, error = %err, "could not re-read account after lost write");
            return WriteCheck::Unknown;
        }
    };

    let expected = update.expected_version;
    if expected.matches(account.version()) {
        WriteCheck::NotLanded
    } else if account.version() == expected.next() {
        if account.balance() == update.new_balance {
            WriteCheck::Landed(account.version())
        } else {
            WriteCheck::NotLanded
        }
    } else {
        WriteCheck::Unknown
    }
}

/// Apply both writes with one multi-key compare-and-swap.
pub(crate) async fn commit_atomic<S>(
    store: &S,
    plan: &TransferPlan,
    timeout: Duration,
) -> Result<CommitReport, CommitError>
where
    S: AccountStore + ?Sized,
{
    let updates = plan.in_lock_order();
    let versions = match bounded(
        "compare_and_swap_many",
        timeout,
        store.compare_and_swap_many(&updates),
    )
    .await
    {
        Ok(versions) => versions,
        Err(err) if err.is_ambiguous() => return settle_lost_batch(store, plan, timeout, err).await,
        Err(err) => return Err(CommitError::NotApplied(err)),
    };

    // Versions come back in the order the updates were passed.
    let version_of = |id: AccountId| {
        updates
            .iter()
            .zip(&versions)
            .find(|(update, _)| update.account_id == id)
            .map_or(0, |(_, version)| *version)
    };

    Ok(CommitReport {
        sender_version: version_of(plan.debit.account_id),
        receiver_version: version_of(plan.credit.account_id),
        credit_attempts: 1,
        atomic: true,
    })
}

/// Decide a batch whose answer was lost.
///
/// The batch is all-or-nothing, so one account still at its expected version
/// means nothing was written and one account showing the planned write means
/// both were.
async fn settle_lost_batch<S>(
    store: &S,
    plan: &TransferPlan,
    timeout: Duration,
    err: TransferError,
) -> Result<CommitReport, CommitError>
where
    S: AccountStore + ?Sized,
{
    let debit = check_write(store, &plan.debit, timeout).await;
    let credit = check_write(store, &plan.credit, timeout).await;
    debug!(?debit, ?credit, error = %err, "re-read after lost batch answer");

    let landed_version = |check: WriteCheck, update: &BalanceUpdate| match check {
        WriteCheck::Landed(version) => version,
        _ => update.expected_version.next(),
    };

    match (debit, credit) {
        (WriteCheck::NotLanded, _) | (_, WriteCheck::NotLanded) => Err(CommitError::NotApplied(err)),
        (WriteCheck::Landed(_), _) | (_, WriteCheck::Landed(_)) => {
            warn!(error = %err, "batch answer lost but the write landed");
            Ok(CommitReport {
                sender_version: landed_version(debit, &plan.debit),
                receiver_version: landed_version(credit, &plan.credit),
                credit_attempts: 1,
                atomic: true,
            })
        }
        (WriteCheck::Unknown, WriteCheck::Unknown) => Err(CommitError::OutcomeUnknown {
            last_error: err,
            attempts: 1,
        }),
    }
}

/// Debit the sender, then drive the credit home.
///
/// A conflict on the debit means nothing was written and the caller may retry
/// the whole attempt. Once the debit is written it is never rolled back: the
/// credit is retried against freshly read receiver state until it lands or the
/// credit policy runs out. A debit whose answer is lost is re-read before
/// anything else happens.
pub(crate) async fn commit_compensating<S>(
    store: &S,
    plan: &TransferPlan,
    settings: &TransferSettings,
) -> Result<CommitReport, CommitError>
where
    S: AccountStore + ?Sized,
{
    let debit = plan.debit;
    let sender_version = match bounded(
        "debit",
        settings.store_timeout,
        store.compare_and_swap(debit.account_id, debit.expected_version, debit.new_balance),
    )
    .await
    {
        Ok(version) => version,
        Err(err) if err.is_ambiguous() => {
            match check_write(store, &debit, settings.store_timeout).await {
                WriteCheck::Landed(version) => {
                    warn!(account_id = %debit.account_id, error = %err, "debit answer lost but the write landed");
                    version
                }
                WriteCheck::NotLanded => return Err(CommitError::NotApplied(err)),
                WriteCheck::Unknown => {
                    return Err(CommitError::OutcomeUnknown {
                        last_error: err,
                        attempts: 0,
                    });
                }
            }
        }
        Err(err) => return Err(CommitError::NotApplied(err)),
    };

    debug!(
        account_id = %debit.account_id,
        version = sender_version,
        "debit applied, crediting receiver"
    );

    let credit = apply_credit(
        store,
        plan.credit.account_id,
        plan.amount,
        Some(plan.credit),
        &settings.credit_retry,
        settings.store_timeout,
    )
    .await
    .map_err(|failure| {
        if failure.outcome_unknown {
            CommitError::OutcomeUnknown {
                last_error: failure.last_error,
                attempts: failure.attempts,
            }
        } else {
            CommitError::CreditFailed {
                last_error: failure.last_error,
                attempts: failure.attempts,
            }
        }
    })?;

    Ok(CommitReport {
        sender_version,
        receiver_version: credit.version,
        credit_attempts: credit.attempts,
        atomic: false,
    })
}

/// Add `amount` to the receiver's balance, retrying under `policy`.
///
/// The first try uses `planned` if given; every later try re-reads the
/// receiver and recomputes its balance. A credit whose answer is lost is
/// re-read first, so a credit that landed is never applied twice; if the
/// re-read cannot decide, the credit is given up with `outcome_unknown`.
/// Cancellation is not observed.
pub async fn apply_credit<S>(
    store: &S,
    receiver_id: AccountId,
    amount: Amount,
    planned: Option<BalanceUpdate>,
    policy: &RetryPolicy,
    timeout: Duration,
) -> Result<CreditOutcome, CreditFailure>
where
    S: AccountStore + ?Sized,
{
    let mut planned = planned;
    let mut attempts = 0;

    loop {
        attempts += 1;
        let update = match planned.take() {
            Some(update) => Ok(update),
            None => fresh_credit(store, receiver_id, amount, timeout).await,
        };

        let result = match update {
            Ok(update) => match bounded(
                "credit",
                timeout,
                store.compare_and_swap(update.account_id, update.expected_version, update.new_balance),
            )
            .await
            {
                Err(err) if err.is_ambiguous() => match check_write(store, &update, timeout).await {
                    WriteCheck::Landed(version) => {
                        warn!(account_id = %receiver_id, error = %err, "credit answer lost but the write landed");
                        Ok(version)
                    }
                    WriteCheck::NotLanded => Err(err),
                    WriteCheck::Unknown => {
                        return Err(CreditFailure {
                            last_error: err,
                            attempts,
                            outcome_unknown: true,
                        });
                    }
                },
                other => other,
            },
            Err(err) => Err(err),
        };

        match result {
            Ok(version) => return Ok(CreditOutcome { version, attempts }),
            Err(last_error) if !policy.should_retry(attempts) => {
                return Err(CreditFailure {
                    last_error,
                    attempts,
                    outcome_unknown: false,
                });
            }
            Err(err) => {
                let delay = policy.delay_for_attempt(attempts);
                warn!(
                    account_id = %receiver_id,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "credit failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Credit planned against the receiver as it is now.
async fn fresh_credit<S>(
    store: &S,
    receiver_id: AccountId,
    amount: Amount,
    timeout: Duration,
) -> Result<BalanceUpdate, TransferError>
where
    S: AccountStore + ?Sized,
{
    let receiver = bounded("get_account", timeout, store.get(receiver_id)).await?;
    let new_balance = receiver
        .balance()
        .checked_add(amount.get())
        .ok_or(TransferError::Rejected(RejectReason::InvalidAmount))?;

    Ok(BalanceUpdate {
        account_id: receiver_id,
        expected_version: receiver.expected_version(),
        new_balance,
    })
}
