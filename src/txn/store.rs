//! Store wrapper that routes lock requests and protected writes through an
//! [`ExpectedValueCheckingTransaction`].

use crate::core::backend_op;
use crate::core::error::LockResult;
use crate::locking::claim::KeyColumn;
use crate::locking::locker::Locker;
use crate::store::{Entry, KeyColumnValueStore, KeySliceQuery};
use crate::txn::transaction::ExpectedValueCheckingTransaction;
use bytes::Bytes;
use std::sync::Arc;

/// A data store paired with the locker guarding it.
///
/// Stores opened without a locker accept lock requests and ignore them.
pub struct ExpectedValueCheckingStore {
    store: Arc<dyn KeyColumnValueStore>,
    locker: Option<Arc<dyn Locker>>,
}

impl ExpectedValueCheckingStore {
    pub fn new(store: Arc<dyn KeyColumnValueStore>, locker: Option<Arc<dyn Locker>>) -> Self {
        Self { store, locker }
    }

    pub fn name(&self) -> &str {
        self.store.name()
    }

    /// The wrapped data store.
    pub fn backing(&self) -> &Arc<dyn KeyColumnValueStore> {
        &self.store
    }

    pub fn locker(&self) -> Option<&Arc<dyn Locker>> {
        self.locker.as_ref()
    }

    /// Lock `(key, column)` for `tx` and record `expected` as the value the
    /// position must hold when `tx` starts mutating. `None` expects the
    /// position to be absent.
    ///
    /// Only the first expected value recorded for a position counts.
    pub fn acquire_lock(
        self: &Arc<Self>,
        key: impl Into<Bytes>,
        column: impl Into<Bytes>,
        expected: Option<Bytes>,
        tx: &mut ExpectedValueCheckingTransaction,
    ) -> LockResult<()> {
        tx.acquire_lock(self, KeyColumn::new(key, column), expected)
    }

    /// Read through the data transaction.
    pub fn get_slice(
        &self,
        query: &KeySliceQuery,
        tx: &ExpectedValueCheckingTransaction,
    ) -> LockResult<Vec<Entry>> {
        backend_op::execute(
            "get slice",
            self.name(),
            tx.max_read_time(),
            tx.times(),
            || self.store.get_slice(query, tx.data_tx().as_ref()),
        )
    }

    /// Write to one row.
    ///
    /// The first write verifies every lock and expected value `tx` holds. If
    /// `tx` holds any lock, the write goes through the key-consistent
    /// transaction so readers of locked positions see it.
    pub fn mutate(
        &self,
        key: &[u8],
        additions: &[Entry],
        deletions: &[Bytes],
        tx: &mut ExpectedValueCheckingTransaction,
    ) -> LockResult<()> {
        let holds_locks = tx.prepare_for_mutations()?;
        let handle = if holds_locks {
            tx.strong_tx()
        } else {
            tx.data_tx()
        };
        backend_op::execute(
            "mutate",
            self.name(),
            tx.max_write_time(),
            tx.times(),
            || self.store.mutate(key, additions, deletions, handle.as_ref()),
        )
    }

    /// Release the locks `tx` holds on this store.
    pub fn delete_locks(&self, tx: &mut ExpectedValueCheckingTransaction) -> LockResult<()> {
        tx.delete_store_locks(self.name())
    }
}
