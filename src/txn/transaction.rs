//! Transactions that lock and verify before they write.
//!
//! An [`ExpectedValueCheckingTransaction`] wraps two backend transactions:
//! the caller's data transaction, which may be eventually consistent, and a
//! key-consistent transaction used for lock claims, expected-value reads and,
//! once locks are held, the protected writes themselves.
//!
//! Lifecycle:
//!
//! ```text
//!   Locking ──prepare_for_mutations──▶ Mutating ──commit──▶ Committed
//!      │                                   │
//!      └──────────────rollback─────────────┴──────────────▶ RolledBack
//! ```
//!
//! While `Locking`, the transaction collects lock claims and the value each
//! locked position was expected to have. The first mutation verifies every
//! claim and every expected value exactly once, then moves to `Mutating`;
//! further lock requests are rejected from that point on. Lock records are
//! deleted on every way out: commit, rollback, failed commit, and drop.

use crate::core::backend_op;
use crate::core::config::StorageConfig;
use crate::core::error::{LockFailure, LockResult, LockingError};
use crate::core::time::TimestampProvider;
use crate::locking::claim::KeyColumn;
use crate::locking::status::{LockerState, TxId};
use crate::store::{Entry, KeySliceQuery, StoreTx};
use crate::txn::store::ExpectedValueCheckingStore;
use bytes::Bytes;
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Where a transaction is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPhase {
    /// Acquiring locks and recording expected values.
    Locking,
    /// Locks and expected values verified; writes allowed, locks not.
    Mutating { holds_locks: bool },
    Committed,
    RolledBack,
}

impl TxPhase {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

/// Locks and expected values one transaction holds on one store.
struct StoreLockState {
    store: Arc<ExpectedValueCheckingStore>,
    expected: BTreeMap<KeyColumn, Option<Bytes>>,
    locks: LockerState,
}

impl StoreLockState {
    fn new(store: Arc<ExpectedValueCheckingStore>) -> Self {
        Self {
            store,
            expected: BTreeMap::new(),
            locks: LockerState::new(),
        }
    }
}

/// A transaction that takes consistent-key locks and checks expected values
/// before its first write.
///
/// A transaction has one owner. Operations that change its state take
/// `&mut self`, and `commit`/`rollback` consume it.
pub struct ExpectedValueCheckingTransaction {
    id: TxId,
    backend: String,
    data: StoreTx,
    strong: StoreTx,
    times: Arc<dyn TimestampProvider>,
    max_read_time: Duration,
    max_write_time: Duration,
    phase: TxPhase,
    // Keyed by store name so checks and deletes run in a stable order.
    stores: BTreeMap<String, StoreLockState>,
}

impl ExpectedValueCheckingTransaction {
    /// Wrap a data transaction and a key-consistent transaction begun on the
    /// backend named `backend`.
    pub fn new(
        backend: impl Into<String>,
        data: StoreTx,
        strong: StoreTx,
        times: Arc<dyn TimestampProvider>,
        storage: &StorageConfig,
    ) -> Self {
        Self {
            id: TxId::next(),
            backend: backend.into(),
            data,
            strong,
            times,
            max_read_time: storage.max_read_time(),
            max_write_time: storage.max_write_time(),
            phase: TxPhase::Locking,
            stores: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn phase(&self) -> TxPhase {
        self.phase
    }

    /// The caller's data transaction.
    pub fn data_tx(&self) -> &StoreTx {
        &self.data
    }

    /// The key-consistent transaction used for locks and checks.
    pub fn strong_tx(&self) -> &StoreTx {
        &self.strong
    }

    pub(crate) fn times(&self) -> &dyn TimestampProvider {
        self.times.as_ref()
    }

    pub(crate) fn max_read_time(&self) -> Duration {
        self.max_read_time
    }

    pub(crate) fn max_write_time(&self) -> Duration {
        self.max_write_time
    }

    /// Number of locks currently held across all stores.
    pub fn lock_count(&self) -> usize {
        self.stores
            .values()
            .map(|state| state.locks.len())
            .sum()
    }

    /// Value recorded as expected at `target` in store `store`, if any.
    /// The outer option is whether anything was recorded; the inner one is
    /// the recorded value, `None` meaning "expected absent".
    pub fn expected_value(&self, store: &str, target: &KeyColumn) -> Option<Option<Bytes>> {
        self.stores
            .get(store)
            .and_then(|state| state.expected.get(target).cloned())
    }

    /// Take the lock on `target` in `store` and remember `expected` as the
    /// value it must still have when mutations start.
    pub(crate) fn acquire_lock(
        &mut self,
        store: &Arc<ExpectedValueCheckingStore>,
        target: KeyColumn,
        expected: Option<Bytes>,
    ) -> LockResult<()> {
        let Some(locker) = store.locker() else {
            tracing::trace!(store = %store.name(), kc = %target, "store has no locker; ignoring lock request");
            return Ok(());
        };

        self.ensure_locking()?;

        let state = self
            .stores
            .entry(store.name().to_string())
            .or_insert_with(|| StoreLockState::new(store.clone()));

        if let Err(e) = locker.write_lock(&target, self.id, &mut state.locks, &self.strong) {
            if state.locks.is_empty() && state.expected.is_empty() {
                self.stores.remove(store.name());
            }
            return Err(e);
        }

        match state.expected.entry(target) {
            btree_map::Entry::Vacant(vacant) => {
                tracing::debug!(
                    tx = %self.id,
                    store = %store.name(),
                    kc = %vacant.key(),
                    expected = ?expected.as_ref().map(hex::encode),
                    "stored expected value"
                );
                vacant.insert(expected);
            }
            btree_map::Entry::Occupied(occupied) => {
                tracing::debug!(
                    tx = %self.id,
                    store = %store.name(),
                    kc = %occupied.key(),
                    discarded = ?expected.as_ref().map(hex::encode),
                    "expected value already stored; discarding"
                );
            }
        }
        Ok(())
    }

    /// Verify every lock and expected value, then allow mutations.
    ///
    /// Idempotent: checks run on the first call only. Returns whether the
    /// transaction holds any locks, in which case writes must go through the
    /// key-consistent transaction.
    pub fn prepare_for_mutations(&mut self) -> LockResult<bool> {
        match self.phase {
            TxPhase::Locking => {}
            TxPhase::Mutating { holds_locks } => return Ok(holds_locks),
            TxPhase::Committed | TxPhase::RolledBack => {
                return Err(LockingError::permanent(LockFailure::TransactionClosed {
                    tx: self.id.as_u64(),
                }))
            }
        }

        self.check_all_locks()?;
        self.check_all_expected_values()?;

        let holds_locks = !self.stores.is_empty();
        self.phase = TxPhase::Mutating { holds_locks };
        tracing::debug!(tx = %self.id, holds_locks, "mutations started");
        Ok(holds_locks)
    }

    fn ensure_locking(&self) -> LockResult<()> {
        match self.phase {
            TxPhase::Locking => Ok(()),
            TxPhase::Mutating { .. } => Err(LockingError::permanent(LockFailure::MutationStarted {
                tx: self.id.as_u64(),
            })),
            TxPhase::Committed | TxPhase::RolledBack => {
                Err(LockingError::permanent(LockFailure::TransactionClosed {
                    tx: self.id.as_u64(),
                }))
            }
        }
    }

    fn check_all_locks(&mut self) -> LockResult<()> {
        for state in self.stores.values_mut() {
            if let Some(locker) = state.store.locker() {
                locker.check_locks(&mut state.locks, &self.strong)?;
            }
        }
        Ok(())
    }

    fn check_all_expected_values(&self) -> LockResult<()> {
        for state in self.stores.values() {
            for (target, expected) in &state.expected {
                self.check_single_expected_value(&state.store, target, expected)?;
            }
        }
        Ok(())
    }

    fn check_single_expected_value(
        &self,
        store: &ExpectedValueCheckingStore,
        target: &KeyColumn,
        expected: &Option<Bytes>,
    ) -> LockResult<()> {
        // The exact column sorts first in its slice, so one entry decides.
        let query =
            KeySliceQuery::single_column(target.key().clone(), target.column()).with_limit(1);
        let entries = backend_op::execute(
            "read expected value",
            store.name(),
            self.max_read_time,
            self.times.as_ref(),
            || store.backing().get_slice(&query, self.strong.as_ref()),
        )?;

        // Without an exact match the one entry is a longer column prefixed by ours.
        let actual: Vec<Bytes> = entries
            .into_iter()
            .filter(|entry| entry.column == *target.column())
            .map(|Entry { value, .. }| value)
            .collect();

        let matches = match expected {
            None => actual.is_empty(),
            Some(value) => actual.len() == 1 && actual[0] == *value,
        };

        if !matches {
            return Err(LockingError::permanent(LockFailure::ExpectedValueMismatch {
                store: store.name().to_string(),
                target: target.clone(),
                expected: expected.clone(),
                actual,
            }));
        }

        tracing::debug!(tx = %self.id, store = %store.name(), kc = %target, "expected value matched");
        Ok(())
    }

    /// Delete this transaction's lock records in `store`.
    pub(crate) fn delete_store_locks(&mut self, store: &str) -> LockResult<()> {
        let Some(state) = self.stores.get_mut(store) else {
            return Ok(());
        };
        match state.store.locker() {
            Some(locker) => locker.delete_locks(self.id, &mut state.locks, &self.strong),
            None => Ok(()),
        }
    }

    /// Delete every lock record this transaction holds, attempting all stores
    /// even when one fails. Returns the first failure.
    fn delete_all_locks(&mut self) -> LockResult<()> {
        let mut first = None;
        for (name, state) in self.stores.iter_mut() {
            let Some(locker) = state.store.locker() else {
                continue;
            };
            if let Err(e) = locker.delete_locks(self.id, &mut state.locks, &self.strong) {
                tracing::error!(tx = %self.id, store = %name, error = %e, "failed to release locks");
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Commit the data transaction, release every lock, then commit the
    /// key-consistent transaction.
    ///
    /// If the data commit fails, locks are still released and the
    /// key-consistent transaction is rolled back; the data error is returned.
    pub fn commit(mut self) -> LockResult<()> {
        if let Err(e) = self.data.commit() {
            let err = LockingError::backend(self.backend.as_str(), e);
            tracing::warn!(tx = %self.id, error = %err, "data commit failed; releasing locks");
            if let Err(e) = self.delete_all_locks() {
                tracing::error!(tx = %self.id, error = %e, "failed to release locks after failed commit");
            }
            if let Err(e) = self.strong.rollback() {
                tracing::warn!(tx = %self.id, error = %e, "failed to roll back key-consistent transaction");
            }
            self.phase = TxPhase::RolledBack;
            return Err(err);
        }

        let locks = self.delete_all_locks();
        let strong = self
            .strong
            .commit()
            .map_err(|e| LockingError::backend(self.backend.as_str(), e));
        self.phase = TxPhase::Committed;
        tracing::debug!(tx = %self.id, "committed");
        locks.and(strong)
    }

    /// Release every lock and roll back both transactions. Every step is
    /// attempted; the first failure is returned.
    pub fn rollback(mut self) -> LockResult<()> {
        let result = self.rollback_inner();
        self.phase = TxPhase::RolledBack;
        tracing::debug!(tx = %self.id, "rolled back");
        result
    }

    fn rollback_inner(&mut self) -> LockResult<()> {
        let locks = self.delete_all_locks();
        let data = self
            .data
            .rollback()
            .map_err(|e| LockingError::backend(self.backend.as_str(), e));
        let strong = self
            .strong
            .rollback()
            .map_err(|e| LockingError::backend(self.backend.as_str(), e));
        locks.and(data).and(strong)
    }
}

impl Drop for ExpectedValueCheckingTransaction {
    fn drop(&mut self) {
        if self.phase.is_finished() {
            return;
        }
        tracing::warn!(tx = %self.id, locks = self.lock_count(), "transaction dropped while open; rolling back");
        if let Err(e) = self.rollback_inner() {
            tracing::warn!(tx = %self.id, error = %e, "rollback of dropped transaction failed");
        }
    }
}

impl std::fmt::Debug for ExpectedValueCheckingTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpectedValueCheckingTransaction")
            .field("id", &self.id)
            .field("backend", &self.backend)
            .field("phase", &self.phase)
            .finish()
    }
}
