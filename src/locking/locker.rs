//! Consistent-key distributed locking.
//!
//! Mutual exclusion over a store that offers nothing stronger than
//! key-consistent reads and writes:
//!
//! 1. **Write.** The locker writes a claim column `(now, rid)` under the
//!    target's lock row. A write that fails temporarily, or that takes longer
//!    than the propagation delay, is retried with a fresh timestamp and the
//!    previous column is removed in the same mutation.
//! 2. **Wait.** Before checking, the locker sleeps until the propagation delay
//!    has passed since the claim's timestamp, so every competing claim written
//!    earlier is visible.
//! 3. **Check.** All claims on the lock row are read back in column order,
//!    which is claim order. Claims older than `now - expire` are abandoned and
//!    handed to the cleaner. Among the rest, the first must be ours.
//! 4. **Release.** The holder deletes its claim column when the transaction
//!    finishes, whatever the outcome.
//!
//! A process-local mediator short-circuits contention between transactions
//! of the same process, which share one rid and so could not be told apart
//! by the store.

use crate::core::backend_op;
use crate::core::config::Config;
use crate::core::error::{LockFailure, LockResult, LockingError};
use crate::core::time::TimestampProvider;
use crate::locking::claim::{display_rid, KeyColumn, TimestampRid};
use crate::locking::cleaner::LockCleanerService;
use crate::locking::codec::{ConsistentKeyLockerSerializer, LOCK_COL_END, LOCK_COL_START};
use crate::locking::mediator::LocalLockMediator;
use crate::locking::status::{ConsistentLockStatus, LockerState, TxId};
use crate::store::{Entry, KeyColumnValueStore, KeySliceQuery, StoreTx};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// Default propagation delay.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_millis(100);

/// Default expiry threshold.
pub const DEFAULT_LOCK_EXPIRE: Duration = Duration::from_secs(300);

/// Default attempts per claim write.
pub const DEFAULT_LOCK_RETRIES: u32 = 3;

/// Default budget for one store read or write.
pub const DEFAULT_MAX_OP_TIME: Duration = Duration::from_secs(10);

/// Lock acquisition, verification and release for one store.
///
/// Lockers keep no per-transaction state of their own; each transaction owns a
/// [`LockerState`] and passes it in.
pub trait Locker: Send + Sync {
    /// Write a claim on `target` and record it in `state`. A no-op when
    /// `state` already holds `target`.
    fn write_lock(
        &self,
        target: &KeyColumn,
        owner: TxId,
        state: &mut LockerState,
        tx: &StoreTx,
    ) -> LockResult<()>;

    /// Verify every unchecked claim in `state` is still the oldest live claim
    /// on its target.
    fn check_locks(&self, state: &mut LockerState, tx: &StoreTx) -> LockResult<()>;

    /// Delete every claim in `state`, release local claims and clear `state`.
    fn delete_locks(&self, owner: TxId, state: &mut LockerState, tx: &StoreTx) -> LockResult<()>;
}

/// The consistent-key locker.
pub struct ConsistentKeyLocker {
    store: Arc<dyn KeyColumnValueStore>,
    times: Arc<dyn TimestampProvider>,
    serializer: ConsistentKeyLockerSerializer,
    rid: Bytes,
    lock_wait: Duration,
    lock_expire: Duration,
    lock_retries: u32,
    max_read_time: Duration,
    max_write_time: Duration,
    mediator: Arc<LocalLockMediator<TxId>>,
    cleaner: Option<Arc<dyn LockCleanerService>>,
}

impl ConsistentKeyLocker {
    /// Start building a locker that keeps claims in `store`.
    pub fn builder(
        store: Arc<dyn KeyColumnValueStore>,
        times: Arc<dyn TimestampProvider>,
    ) -> ConsistentKeyLockerBuilder {
        ConsistentKeyLockerBuilder::new(store, times)
    }

    pub fn rid(&self) -> &Bytes {
        &self.rid
    }

    pub fn store(&self) -> &Arc<dyn KeyColumnValueStore> {
        &self.store
    }

    pub fn mediator(&self) -> &Arc<LocalLockMediator<TxId>> {
        &self.mediator
    }

    pub fn lock_wait(&self) -> Duration {
        self.lock_wait
    }

    pub fn lock_expire(&self) -> Duration {
        self.lock_expire
    }

    fn lock_key(&self, target: &KeyColumn) -> Bytes {
        self.serializer.to_lock_key(target.key(), target.column())
    }

    fn write_single_lock(&self, target: &KeyColumn, tx: &StoreTx) -> LockResult<ConsistentLockStatus> {
        let lock_key = self.lock_key(target);
        let mut previous: Option<Bytes> = None;

        for attempt in 1..=self.lock_retries {
            let claim_ts = self.times.now();
            let column = self
                .serializer
                .to_lock_column(claim_ts, &self.rid, self.times.as_ref());
            let additions = [Entry::new(column.clone(), Bytes::new())];
            let deletions: Vec<Bytes> = previous.take().into_iter().collect();

            let result = backend_op::execute(
                "write lock claim",
                self.store.name(),
                self.max_write_time,
                self.times.as_ref(),
                || {
                    self.store
                        .mutate(&lock_key, &additions, &deletions, tx.as_ref())
                },
            );
            let completed = self.times.now();
            let took = completed.saturating_duration_since(claim_ts);

            match result {
                Ok(()) if took <= self.lock_wait => {
                    tracing::debug!(kc = %target, attempt, timestamp = %claim_ts, "wrote lock claim");
                    return Ok(ConsistentLockStatus::new(
                        TimestampRid::new(claim_ts, self.rid.clone()),
                        completed,
                    ));
                }
                Ok(()) => {
                    tracing::warn!(
                        kc = %target,
                        attempt,
                        ?took,
                        lock_wait = ?self.lock_wait,
                        "lock claim write exceeded the propagation delay; retrying"
                    );
                    previous = Some(column);
                }
                Err(e) if e.is_retriable() => {
                    tracing::warn!(kc = %target, attempt, error = %e, "temporary failure writing lock claim");
                    previous = Some(column);
                }
                Err(e) => {
                    // The failed mutation may still have been applied.
                    let mut abandoned = deletions;
                    abandoned.push(column);
                    self.discard_claims(target, &lock_key, &abandoned, tx);
                    return Err(e);
                }
            }
        }

        if let Some(column) = previous {
            self.discard_claims(target, &lock_key, &[column], tx);
        }

        Err(LockingError::temporary(LockFailure::WriteRetriesExhausted {
            target: target.clone(),
            attempts: self.lock_retries,
        }))
    }

    /// Best-effort removal of claim columns a failed write left behind.
    fn discard_claims(&self, target: &KeyColumn, lock_key: &[u8], columns: &[Bytes], tx: &StoreTx) {
        if let Err(e) = self.store.mutate(lock_key, &[], columns, tx.as_ref()) {
            tracing::warn!(kc = %target, error = %e, "failed to remove abandoned lock claim");
        }
    }

    fn check_single_lock(
        &self,
        target: &KeyColumn,
        status: &mut ConsistentLockStatus,
        tx: &StoreTx,
    ) -> LockResult<()> {
        if status.is_checked() {
            return Ok(());
        }

        let now = self
            .times
            .sleep_past(status.write_timestamp().plus(self.lock_wait));

        let query = KeySliceQuery::new(self.lock_key(target), LOCK_COL_START, LOCK_COL_END);
        let entries = backend_op::execute(
            "read lock claims",
            self.store.name(),
            self.max_read_time,
            self.times.as_ref(),
            || self.store.get_slice(&query, tx.as_ref()),
        )?;

        let cutoff = now.minus(self.lock_expire);
        let mut live = Vec::with_capacity(entries.len());
        let mut saw_expired = false;

        for entry in &entries {
            let claim = self
                .serializer
                .from_lock_column(&entry.column, self.times.as_ref())?;

            if claim.timestamp().is_before(cutoff) {
                tracing::warn!(
                    kc = %target,
                    rid = %display_rid(claim.rid()),
                    timestamp = %claim.timestamp(),
                    "discarded expired claim"
                );
                if claim == *status.claim() {
                    return Err(LockingError::permanent(LockFailure::ExpiredClaim {
                        target: target.clone(),
                        claim,
                        expire: self.lock_expire,
                    }));
                }
                saw_expired = true;
                continue;
            }
            live.push(claim);
        }

        if saw_expired {
            if let Some(ref cleaner) = self.cleaner {
                cleaner.clean(target, cutoff, tx);
            }
        }

        self.check_seniority(target, status, &live)?;
        status.set_checked();
        Ok(())
    }

    fn check_seniority(
        &self,
        target: &KeyColumn,
        status: &ConsistentLockStatus,
        claims: &[TimestampRid],
    ) -> LockResult<()> {
        for claim in claims {
            if claim.rid() != &self.rid {
                tracing::debug!(
                    kc = %target,
                    holder = %claim,
                    ours = %status.claim(),
                    "lock already held"
                );
                return Err(LockingError::permanent(LockFailure::AlreadyHeld {
                    target: target.clone(),
                    ours: status.claim().clone(),
                    winner: claim.clone(),
                }));
            }
            if claim.timestamp() == status.write_timestamp() {
                tracing::debug!(kc = %target, "checked lock");
                return Ok(());
            }
            tracing::warn!(
                kc = %target,
                timestamp = %claim.timestamp(),
                expected = %status.write_timestamp(),
                "skipping outdated claim with our rid"
            );
        }

        Err(LockingError::permanent(LockFailure::ClaimNotFound {
            target: target.clone(),
            ours: status.claim().clone(),
            seen: claims.len(),
        }))
    }

    fn delete_single_lock(
        &self,
        target: &KeyColumn,
        status: &ConsistentLockStatus,
        tx: &StoreTx,
    ) -> LockResult<()> {
        let lock_key = self.lock_key(target);
        let column = self
            .serializer
            .to_lock_column_of(status.claim(), self.times.as_ref());
        backend_op::execute(
            "delete lock claim",
            self.store.name(),
            self.max_write_time,
            self.times.as_ref(),
            || {
                self.store
                    .mutate(&lock_key, &[], std::slice::from_ref(&column), tx.as_ref())
            },
        )
    }
}

impl Locker for ConsistentKeyLocker {
    fn write_lock(
        &self,
        target: &KeyColumn,
        owner: TxId,
        state: &mut LockerState,
        tx: &StoreTx,
    ) -> LockResult<()> {
        if state.contains(target) {
            tracing::debug!(kc = %target, %owner, "already locked by this transaction");
            return Ok(());
        }

        if !self.mediator.lock(target, &owner, self.lock_expire) {
            return Err(LockingError::temporary(LockFailure::LocalContention {
                target: target.clone(),
            }));
        }

        match self.write_single_lock(target, tx) {
            Ok(status) => {
                state.insert(target.clone(), status);
                Ok(())
            }
            Err(e) => {
                self.mediator.unlock(target, &owner);
                Err(e)
            }
        }
    }

    fn check_locks(&self, state: &mut LockerState, tx: &StoreTx) -> LockResult<()> {
        for (target, status) in state.iter_mut() {
            self.check_single_lock(target, status, tx)?;
        }
        Ok(())
    }

    fn delete_locks(&self, owner: TxId, state: &mut LockerState, tx: &StoreTx) -> LockResult<()> {
        let locks = state.drain();
        let total = locks.len();
        let mut failed = 0;
        let mut first: Option<LockingError> = None;

        for (target, status) in locks {
            if let Err(e) = self.delete_single_lock(&target, &status, tx) {
                tracing::error!(kc = %target, %owner, error = %e, "failed to delete lock claim");
                failed += 1;
                first.get_or_insert(e);
            }
            // The local claim goes regardless; a stuck column is the store's
            // problem and ages out through expiry.
            self.mediator.unlock(&target, &owner);
        }

        match first {
            None => Ok(()),
            Some(e) => Err(LockingError::permanent(LockFailure::CleanupFailed {
                failed,
                total,
                first: e.to_string(),
            })),
        }
    }
}

/// Builder for [`ConsistentKeyLocker`].
pub struct ConsistentKeyLockerBuilder {
    store: Arc<dyn KeyColumnValueStore>,
    times: Arc<dyn TimestampProvider>,
    rid: Option<Bytes>,
    lock_wait: Duration,
    lock_expire: Duration,
    lock_retries: u32,
    max_read_time: Duration,
    max_write_time: Duration,
    mediator: Option<Arc<LocalLockMediator<TxId>>>,
    cleaner: Option<Arc<dyn LockCleanerService>>,
}

impl ConsistentKeyLockerBuilder {
    fn new(store: Arc<dyn KeyColumnValueStore>, times: Arc<dyn TimestampProvider>) -> Self {
        Self {
            store,
            times,
            rid: None,
            lock_wait: DEFAULT_LOCK_WAIT,
            lock_expire: DEFAULT_LOCK_EXPIRE,
            lock_retries: DEFAULT_LOCK_RETRIES,
            max_read_time: DEFAULT_MAX_OP_TIME,
            max_write_time: DEFAULT_MAX_OP_TIME,
            mediator: None,
            cleaner: None,
        }
    }

    /// Apply timing, retry and identity settings from `config`.
    pub fn from_config(mut self, config: &Config) -> Self {
        self.lock_wait = config.locking.lock_wait();
        self.lock_expire = config.locking.lock_expire();
        self.lock_retries = config.locking.retries;
        self.max_read_time = config.storage.max_read_time();
        self.max_write_time = config.storage.max_write_time();
        if let Some(ref id) = config.locking.instance_id {
            self.rid = Some(Bytes::from(id.clone().into_bytes()));
        }
        self
    }

    pub fn rid(mut self, rid: impl Into<Bytes>) -> Self {
        self.rid = Some(rid.into());
        self
    }

    pub fn lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    pub fn lock_expire(mut self, expire: Duration) -> Self {
        self.lock_expire = expire;
        self
    }

    pub fn lock_retries(mut self, retries: u32) -> Self {
        self.lock_retries = retries.max(1);
        self
    }

    pub fn max_read_time(mut self, max: Duration) -> Self {
        self.max_read_time = max;
        self
    }

    pub fn max_write_time(mut self, max: Duration) -> Self {
        self.max_write_time = max;
        self
    }

    pub fn mediator(mut self, mediator: Arc<LocalLockMediator<TxId>>) -> Self {
        self.mediator = Some(mediator);
        self
    }

    pub fn cleaner(mut self, cleaner: Arc<dyn LockCleanerService>) -> Self {
        self.cleaner = Some(cleaner);
        self
    }

    pub fn build(self) -> ConsistentKeyLocker {
        let mediator = self.mediator.unwrap_or_else(|| {
            Arc::new(LocalLockMediator::new(
                self.store.name().to_string(),
                self.times.clone(),
            ))
        });
        ConsistentKeyLocker {
            rid: self.rid.unwrap_or_else(generate_rid),
            store: self.store,
            times: self.times,
            serializer: ConsistentKeyLockerSerializer,
            lock_wait: self.lock_wait,
            lock_expire: self.lock_expire,
            lock_retries: self.lock_retries,
            max_read_time: self.max_read_time,
            max_write_time: self.max_write_time,
            mediator,
            cleaner: self.cleaner,
        }
    }
}

/// Random per-process requester id: `<pid>-<random hex>`.
pub fn generate_rid() -> Bytes {
    let suffix: u64 = rand::random();
    Bytes::from(format!("{}-{:016x}", std::process::id(), suffix).into_bytes())
}
