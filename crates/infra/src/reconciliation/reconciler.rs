//! Background worker that settles escalated transfers.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::queue::{ReconciliationEntry, ReconciliationError, ReconciliationQueue};
use crate::account_store::AccountStore;
use crate::retry::RetryPolicy;
use crate::transfer::apply_credit;

/// Reconciler configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Pause between passes over the queue
    pub interval: Duration,
    /// Maximum entries handled per pass
    pub batch_size: usize,
    /// Name for logging
    pub name: String,
    /// Credit attempts per entry and pass
    pub credit_retry: RetryPolicy,
    /// Upper bound for every single store call
    pub store_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            batch_size: 100,
            name: "reconciler".to_string(),
            credit_retry: RetryPolicy::exponential(
                3,
                Duration::from_millis(10),
                Duration::from_millis(500),
            ),
            store_timeout: Duration::from_secs(2),
        }
    }
}

impl ReconcilerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }
}

/// Counters of a reconciler.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ReconcileStats {
    pub passes: u64,
    pub examined: u64,
    pub resolved: u64,
    pub failed: u64,
    /// Entries handed to manual review because a credit answer was lost.
    pub flagged: u64,
    pub uptime_secs: u64,
}

impl ReconcileStats {
    fn absorb(&mut self, pass: &ReconcileStats) {
        self.passes += 1;
        self.examined += pass.examined;
        self.resolved += pass.resolved;
        self.failed += pass.failed;
        self.flagged += pass.flagged;
    }
}

/// Handle to control a running reconciler.
#[derive(Debug)]
pub struct ReconcilerHandle {
    shutdown: CancellationToken,
    join: JoinHandle<()>,
    stats: Arc<Mutex<ReconcileStats>>,
}

impl ReconcilerHandle {
    /// Stop after the current pass and wait for the worker to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(err) = self.join.await {
            error!(error = %err, "reconciler task ended abnormally");
        }
    }

    /// Get current reconciler statistics.
    pub fn stats(&self) -> ReconcileStats {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Re-drives pending credits until they land.
///
/// Corrective action is at-least-once: a crash between applying a credit and
/// marking its entry resolved leaves the entry pending, and the next pass
/// credits again. Run a single reconciler per queue. A credit whose outcome
/// cannot be determined moves its entry to manual review.
pub struct Reconciler<S, Q> {
    store: S,
    queue: Q,
    config: ReconcilerConfig,
}

impl<S, Q> Reconciler<S, Q>
where
    S: AccountStore,
    Q: ReconciliationQueue,
{
    pub fn new(store: S, queue: Q, config: ReconcilerConfig) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// One pass over the oldest pending entries.
    pub async fn run_once(&self) -> Result<ReconcileStats, ReconciliationError> {
        let pending = self.queue.pending(self.config.batch_size)?;
        let mut stats = ReconcileStats {
            examined: pending.len() as u64,
            ..Default::default()
        };

        for entry in pending {
            match self.settle(&entry).await? {
                Settled::Resolved => stats.resolved += 1,
                Settled::Failed => stats.failed += 1,
                Settled::Flagged => stats.flagged += 1,
            }
        }

        Ok(stats)
    }

    async fn settle(&self, entry: &ReconciliationEntry) -> Result<Settled, ReconciliationError> {
        let credited = apply_credit(
            &self.store,
            entry.receiver_id,
            entry.amount,
            None,
            &self.config.credit_retry,
            self.config.store_timeout,
        )
        .await;

        match credited {
            Ok(outcome) => {
                self.queue.mark_resolved(entry.transfer_id)?;
                info!(
                    reconciler = %self.config.name,
                    transfer_id = %entry.transfer_id,
                    receiver_id = %entry.receiver_id,
                    amount = entry.amount.get(),
                    version = outcome.version,
                    "reconciled transfer, credit applied"
                );
                Ok(Settled::Resolved)
            }
            Err(failure) if failure.outcome_unknown => {
                error!(
                    reconciler = %self.config.name,
                    transfer_id = %entry.transfer_id,
                    receiver_id = %entry.receiver_id,
                    error = %failure.last_error,
                    "credit outcome unknown, entry needs manual review"
                );
                self.queue
                    .mark_for_review(entry.transfer_id, failure.last_error.to_string())?;
                Ok(Settled::Flagged)
            }
            Err(failure) => {
                warn!(
                    reconciler = %self.config.name,
                    transfer_id = %entry.transfer_id,
                    receiver_id = %entry.receiver_id,
                    attempts = failure.attempts,
                    error = %failure.last_error,
                    "reconciliation attempt failed, entry stays pending"
                );
                self.queue
                    .record_failure(entry.transfer_id, failure.last_error.to_string())?;
                Ok(Settled::Failed)
            }
        }
    }

    /// Spawn the reconciler on the current tokio runtime.
    pub fn spawn(self) -> ReconcilerHandle
    where
        S: 'static,
        Q: 'static,
    {
        let shutdown = CancellationToken::new();
        let stats = Arc::new(Mutex::new(ReconcileStats::default()));

        let token = shutdown.clone();
        let stats_clone = stats.clone();
        let join = tokio::spawn(async move {
            reconciler_loop(self, token, stats_clone).await;
        });

        ReconcilerHandle {
            shutdown,
            join,
            stats,
        }
    }
}

enum Settled {
    Resolved,
    Failed,
    Flagged,
}

async fn reconciler_loop<S, Q>(
    reconciler: Reconciler<S, Q>,
    shutdown: CancellationToken,
    stats: Arc<Mutex<ReconcileStats>>,
) where
    S: AccountStore,
    Q: ReconciliationQueue,
{
    let name = reconciler.config.name.clone();
    info!(reconciler = %name, "reconciler started");
    let start_time = Instant::now();

    loop {
        match reconciler.run_once().await {
            Ok(pass) => {
                if pass.examined > 0 {
                    debug!(
                        reconciler = %name,
                        examined = pass.examined,
                        resolved = pass.resolved,
                        failed = pass.failed,
                        flagged = pass.flagged,
                        "reconciliation pass finished"
                    );
                }
                let mut s = stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                s.absorb(&pass);
                s.uptime_secs = start_time.elapsed().as_secs();
            }
            Err(e) => {
                error!(reconciler = %name, error = %e, "reconciliation pass failed");
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(reconciler.config.interval) => {}
        }
    }

    info!(reconciler = %name, "reconciler stopped");
}
