//! Best-effort deletion of abandoned lock claims.
//!
//! A process that crashes while holding claims leaves their columns behind.
//! Lockers already ignore claims older than the expiry threshold, so removing
//! them is hygiene rather than a correctness requirement: a cleanup that
//! fails is logged and dropped, never retried, and never reported to the
//! transaction that noticed the stale claim.

use crate::core::error::{LockResult, LockingError};
use crate::core::time::{Timestamp, TimestampProvider};
use crate::locking::claim::{display_rid, KeyColumn};
use crate::locking::codec::{ConsistentKeyLockerSerializer, LOCK_COL_END, LOCK_COL_START};
use crate::store::{KeyColumnValueStore, KeySliceQuery, StoreTx};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;

/// Deletes every claim on one target written strictly before a cutoff.
pub struct LockCleanupJob {
    store: Arc<dyn KeyColumnValueStore>,
    target: KeyColumn,
    cutoff: Timestamp,
    tx: StoreTx,
    serializer: ConsistentKeyLockerSerializer,
    times: Arc<dyn TimestampProvider>,
}

impl LockCleanupJob {
    pub fn new(
        store: Arc<dyn KeyColumnValueStore>,
        target: KeyColumn,
        cutoff: Timestamp,
        tx: StoreTx,
        times: Arc<dyn TimestampProvider>,
    ) -> Self {
        Self {
            store,
            target,
            cutoff,
            tx,
            serializer: ConsistentKeyLockerSerializer,
            times,
        }
    }

    pub fn target(&self) -> &KeyColumn {
        &self.target
    }

    pub fn cutoff(&self) -> Timestamp {
        self.cutoff
    }

    /// Run the cleanup, logging and swallowing any failure.
    pub fn run(self) {
        if let Err(e) = self.try_run() {
            tracing::warn!(kc = %self.target, cutoff = %self.cutoff, error = %e, "expired lock cleaner failed");
        }
    }

    /// Run the cleanup once and return how many claims were deleted.
    pub fn try_run(&self) -> LockResult<usize> {
        let lock_key = self
            .serializer
            .to_lock_key(self.target.key(), self.target.column());
        let query = KeySliceQuery::new(lock_key.clone(), LOCK_COL_START, LOCK_COL_END);
        let claims = self
            .store
            .get_slice(&query, self.tx.as_ref())
            .map_err(|e| LockingError::backend(self.store.name(), e))?;

        let mut deletions = Vec::new();
        for entry in claims {
            let claim = match self
                .serializer
                .from_lock_column(&entry.column, self.times.as_ref())
            {
                Ok(claim) => claim,
                Err(e) => {
                    tracing::warn!(kc = %self.target, error = %e, "skipping undecodable lock column");
                    continue;
                }
            };

            if claim.timestamp().is_before(self.cutoff) {
                tracing::info!(
                    kc = %self.target,
                    rid = %display_rid(claim.rid()),
                    timestamp = %claim.timestamp(),
                    cutoff = %self.cutoff,
                    "deleting expired lock"
                );
                deletions.push(entry.column);
            } else {
                tracing::debug!(
                    kc = %self.target,
                    rid = %display_rid(claim.rid()),
                    timestamp = %claim.timestamp(),
                    cutoff = %self.cutoff,
                    "ignoring lock at or after cutoff"
                );
            }
        }

        if !deletions.is_empty() {
            self.store
                .mutate(&lock_key, &[], &deletions, self.tx.as_ref())
                .map_err(|e| LockingError::backend(self.store.name(), e))?;
            tracing::info!(
                kc = %self.target,
                deleted = deletions.len(),
                cutoff = %self.cutoff,
                "deleted expired locks"
            );
        }

        Ok(deletions.len())
    }
}

/// Accepts cleanup requests from lockers.
///
/// Implementations must not block the caller on the cleanup itself.
pub trait LockCleanerService: Send + Sync {
    fn clean(&self, target: &KeyColumn, cutoff: Timestamp, tx: &StoreTx);
}

#[derive(Debug, Clone, Copy)]
struct Enqueued {
    cutoff: Timestamp,
    at: Timestamp,
}

/// Runs cleanups on a dedicated worker thread.
///
/// Requests are queued and the caller returns immediately. A request for a
/// target is dropped when a cleanup with the same or a later cutoff was
/// queued for it within the cooldown window.
pub struct StandardLockCleanerService {
    store: Arc<dyn KeyColumnValueStore>,
    times: Arc<dyn TimestampProvider>,
    cooldown: Duration,
    recent: Mutex<HashMap<KeyColumn, Enqueued>>,
    sender: Mutex<Option<mpsc::UnboundedSender<LockCleanupJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StandardLockCleanerService {
    /// Start a cleaner for the lock store `store`.
    pub fn new(
        store: Arc<dyn KeyColumnValueStore>,
        times: Arc<dyn TimestampProvider>,
        cooldown: Duration,
    ) -> std::io::Result<Self> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<LockCleanupJob>();
        let worker = std::thread::Builder::new()
            .name(format!("lock-cleaner-{}", store.name()))
            .spawn(move || {
                while let Some(job) = receiver.blocking_recv() {
                    job.run();
                }
                tracing::debug!("lock cleaner worker exiting");
            })?;

        Ok(Self {
            store,
            times,
            cooldown,
            recent: Mutex::new(HashMap::new()),
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Stop accepting requests, finish queued cleanups and join the worker.
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!(store = %self.store.name(), "lock cleaner worker panicked");
            }
        }
    }

    fn should_enqueue(&self, target: &KeyColumn, cutoff: Timestamp) -> bool {
        let now = self.times.now();
        let mut recent = self.recent.lock();
        recent.retain(|_, e| now.saturating_duration_since(e.at) < self.cooldown);

        if let Some(previous) = recent.get(target) {
            if !previous.cutoff.is_before(cutoff) {
                return false;
            }
        }
        recent.insert(target.clone(), Enqueued { cutoff, at: now });
        true
    }
}

impl LockCleanerService for StandardLockCleanerService {
    fn clean(&self, target: &KeyColumn, cutoff: Timestamp, tx: &StoreTx) {
        if !self.should_enqueue(target, cutoff) {
            tracing::debug!(kc = %target, %cutoff, "cleanup already queued; skipping");
            return;
        }

        let job = LockCleanupJob::new(
            self.store.clone(),
            target.clone(),
            cutoff,
            tx.clone(),
            self.times.clone(),
        );
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) if sender.send(job).is_ok() => {
                tracing::debug!(kc = %target, %cutoff, "queued expired lock cleanup");
            }
            _ => tracing::warn!(kc = %target, "lock cleaner is shut down; dropping cleanup"),
        }
    }
}

impl Drop for StandardLockCleanerService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
