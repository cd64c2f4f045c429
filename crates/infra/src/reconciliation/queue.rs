//! Reconciliation queue: transfers whose debit landed but whose credit did not,
//! and transfers whose writes have an unknown outcome.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wallet_core::{AccountId, TransferId};
use wallet_ledger::Amount;

/// Entry lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// The credit still has to be applied.
    Pending,
    /// Whether the transfer's writes landed is unknown. An operator has to
    /// compare both balances; the reconciler leaves these alone.
    NeedsReview,
    /// The credit was applied.
    Resolved,
}

/// A transfer left in `FailedNeedsReconciliation`.
///
/// For a `Pending` entry the sender's debit is already written and resolving
/// it means crediting `amount` to `receiver_id`. A `NeedsReview` entry must
/// not be credited without checking the balances first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationEntry {
    pub transfer_id: TransferId,
    pub sender_id: AccountId,
    pub receiver_id: AccountId,
    pub amount: Amount,
    /// Why the transfer was escalated.
    pub reason: String,
    pub status: EntryStatus,
    /// Corrective attempts made by the reconciler.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ReconciliationEntry {
    pub fn new(
        transfer_id: TransferId,
        sender_id: AccountId,
        receiver_id: AccountId,
        amount: Amount,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            transfer_id,
            sender_id,
            receiver_id,
            amount,
            reason: reason.into(),
            status: EntryStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// The same entry, flagged for manual review instead of an automatic credit.
    pub fn needing_review(mut self) -> Self {
        self.status = EntryStatus::NeedsReview;
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == EntryStatus::Pending
    }
}

/// Reconciliation queue error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconciliationError {
    #[error("reconciliation entry not found: {0}")]
    NotFound(TransferId),
    #[error("reconciliation entry already exists: {0}")]
    AlreadyExists(TransferId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Durable list of transfers awaiting corrective action.
///
/// Entries are never dropped: resolving one only flips its status.
pub trait ReconciliationQueue: Send + Sync {
    /// Queue an escalated transfer.
    fn enqueue(&self, entry: ReconciliationEntry) -> Result<(), ReconciliationError>;

    /// Get an entry by transfer id.
    fn get(&self, transfer_id: TransferId) -> Result<Option<ReconciliationEntry>, ReconciliationError>;

    /// Oldest pending entries first.
    fn pending(&self, limit: usize) -> Result<Vec<ReconciliationEntry>, ReconciliationError>;

    /// Mark the credit as applied.
    fn mark_resolved(&self, transfer_id: TransferId) -> Result<(), ReconciliationError>;

    /// Record a failed corrective attempt; the entry stays pending.
    fn record_failure(
        &self,
        transfer_id: TransferId,
        error: String,
    ) -> Result<(), ReconciliationError>;

    /// Oldest entries waiting for manual review first.
    fn needing_review(&self, limit: usize) -> Result<Vec<ReconciliationEntry>, ReconciliationError>;

    /// Stop automatic corrective action on an entry whose credit may have landed.
    fn mark_for_review(
        &self,
        transfer_id: TransferId,
        error: String,
    ) -> Result<(), ReconciliationError>;
}

impl<Q> ReconciliationQueue for Arc<Q>
where
    Q: ReconciliationQueue + ?Sized,
{
    fn enqueue(&self, entry: ReconciliationEntry) -> Result<(), ReconciliationError> {
        (**self).enqueue(entry)
    }

    fn get(&self, transfer_id: TransferId) -> Result<Option<ReconciliationEntry>, ReconciliationError> {
        (**self).get(transfer_id)
    }

    fn pending(&self, limit: usize) -> Result<Vec<ReconciliationEntry>, ReconciliationError> {
        (**self).pending(limit)
    }

    fn mark_resolved(&self, transfer_id: TransferId) -> Result<(), ReconciliationError> {
        (**self).mark_resolved(transfer_id)
    }

    fn record_failure(
        &self,
        transfer_id: TransferId,
        error: String,
    ) -> Result<(), ReconciliationError> {
        (**self).record_failure(transfer_id, error)
    }

    fn needing_review(&self, limit: usize) -> Result<Vec<ReconciliationEntry>, ReconciliationError> {
        (**self).needing_review(limit)
    }

    fn mark_for_review(
        &self,
        transfer_id: TransferId,
        error: String,
    ) -> Result<(), ReconciliationError> {
        (**self).mark_for_review(transfer_id, error)
    }
}

/// In-memory reconciliation queue for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryReconciliationQueue {
    entries: RwLock<HashMap<TransferId, ReconciliationEntry>>,
}

impl InMemoryReconciliationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Every entry, resolved or not, oldest first.
    pub fn all(&self) -> Result<Vec<ReconciliationEntry>, ReconciliationError> {
        let entries = self.read()?;
        let mut all: Vec<_> = entries.values().cloned().collect();
        all.sort_by_key(|e| e.created_at);
        Ok(all)
    }

    fn oldest_with_status(
        &self,
        status: EntryStatus,
        limit: usize,
    ) -> Result<Vec<ReconciliationEntry>, ReconciliationError> {
        let entries = self.read()?;
        let mut matching: Vec<_> = entries.values().filter(|e| e.status == status).cloned().collect();

        // FIFO
        matching.sort_by_key(|e| e.created_at);
        matching.truncate(limit);
        Ok(matching)
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<TransferId, ReconciliationEntry>>, ReconciliationError>
    {
        self.entries
            .read()
            .map_err(|_| ReconciliationError::Storage("lock poisoned".to_string()))
    }

    fn update<F>(&self, transfer_id: TransferId, f: F) -> Result<(), ReconciliationError>
    where
        F: FnOnce(&mut ReconciliationEntry),
    {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ReconciliationError::Storage("lock poisoned".to_string()))?;
        let entry = entries
            .get_mut(&transfer_id)
            .ok_or(ReconciliationError::NotFound(transfer_id))?;
        f(entry);
        Ok(())
    }
}

impl ReconciliationQueue for InMemoryReconciliationQueue {
    fn enqueue(&self, entry: ReconciliationEntry) -> Result<(), ReconciliationError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ReconciliationError::Storage("lock poisoned".to_string()))?;
        if entries.contains_key(&entry.transfer_id) {
            return Err(ReconciliationError::AlreadyExists(entry.transfer_id));
        }
        entries.insert(entry.transfer_id, entry);
        Ok(())
    }

    fn get(&self, transfer_id: TransferId) -> Result<Option<ReconciliationEntry>, ReconciliationError> {
        Ok(self.read()?.get(&transfer_id).cloned())
    }

    fn pending(&self, limit: usize) -> Result<Vec<ReconciliationEntry>, ReconciliationError> {
        self.oldest_with_status(EntryStatus::Pending, limit)
    }

    fn mark_resolved(&self, transfer_id: TransferId) -> Result<(), ReconciliationError> {
        self.update(transfer_id, |entry| {
            entry.attempts += 1;
            entry.status = EntryStatus::Resolved;
            entry.resolved_at = Some(Utc::now());
        })
    }

    fn record_failure(
        &self,
        transfer_id: TransferId,
        error: String,
    ) -> Result<(), ReconciliationError> {
        self.update(transfer_id, |entry| {
            entry.attempts += 1;
            entry.last_error = Some(error);
        })
    }

    fn needing_review(&self, limit: usize) -> Result<Vec<ReconciliationEntry>, ReconciliationError> {
        self.oldest_with_status(EntryStatus::NeedsReview, limit)
    }

    fn mark_for_review(
        &self,
        transfer_id: TransferId,
        error: String,
    ) -> Result<(), ReconciliationError> {
        self.update(transfer_id, |entry| {
            entry.attempts += 1;
            entry.status = EntryStatus::NeedsReview;
            entry.last_error = Some(error);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> ReconciliationEntry {
        ReconciliationEntry::new(
            TransferId::new(),
            AccountId::new(),
            AccountId::new(),
            Amount::new(25).unwrap(),
            "credit failed",
        )
    }

    #[test]
    fn enqueue_and_list_pending() {
        let queue = InMemoryReconciliationQueue::new();
        let first = entry();
        let second = entry();
        queue.enqueue(first.clone()).unwrap();
        queue.enqueue(second.clone()).unwrap();

        let pending = queue.pending(10).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(queue.pending(1).unwrap().len(), 1);
        assert_eq!(queue.get(first.transfer_id).unwrap(), Some(first));
    }

    #[test]
    fn duplicate_entries_are_rejected() {
        let queue = InMemoryReconciliationQueue::new();
        let e = entry();
        queue.enqueue(e.clone()).unwrap();

        assert_eq!(
            queue.enqueue(e.clone()),
            Err(ReconciliationError::AlreadyExists(e.transfer_id))
        );
    }

    #[test]
    fn resolved_entries_leave_the_pending_list_but_are_kept() {
        let queue = InMemoryReconciliationQueue::new();
        let e = entry();
        queue.enqueue(e.clone()).unwrap();

        queue.record_failure(e.transfer_id, "store down".into()).unwrap();
        let failed = queue.get(e.transfer_id).unwrap().unwrap();
        assert!(failed.is_pending());
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.last_error.as_deref(), Some("store down"));

        queue.mark_resolved(e.transfer_id).unwrap();
        assert!(queue.pending(10).unwrap().is_empty());

        let resolved = queue.get(e.transfer_id).unwrap().unwrap();
        assert_eq!(resolved.status, EntryStatus::Resolved);
        assert_eq!(resolved.attempts, 2);
        assert!(resolved.resolved_at.is_some());
        assert_eq!(queue.all().unwrap().len(), 1);
    }

    #[test]
    fn review_entries_are_kept_out_of_the_pending_list() {
        let queue = InMemoryReconciliationQueue::new();
        let flagged = entry().needing_review();
        let demoted = entry();
        queue.enqueue(flagged.clone()).unwrap();
        queue.enqueue(demoted.clone()).unwrap();

        queue
            .mark_for_review(demoted.transfer_id, "credit answer lost".into())
            .unwrap();

        assert!(queue.pending(10).unwrap().is_empty());
        assert_eq!(queue.needing_review(10).unwrap().len(), 2);
        let stored = queue.get(demoted.transfer_id).unwrap().unwrap();
        assert_eq!(stored.status, EntryStatus::NeedsReview);
        assert_eq!(stored.last_error.as_deref(), Some("credit answer lost"));
        assert_eq!(
            queue.get(flagged.transfer_id).unwrap().unwrap().status,
            EntryStatus::NeedsReview
        );
    }

    #[test]
    fn unknown_entry_is_not_found() {
        let queue = InMemoryReconciliationQueue::new();
        let id = TransferId::new();
        assert_eq!(queue.mark_resolved(id), Err(ReconciliationError::NotFound(id)));
    }

    #[test]
    fn entry_serializes_with_snake_case_status() {
        let json = serde_json::to_value(entry()).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["amount"], 25);
    }
}
