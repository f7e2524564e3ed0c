//! Per-transaction lock bookkeeping.

use crate::core::time::Timestamp;
use crate::locking::claim::{KeyColumn, TimestampRid};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique transaction identity. This is the requester the local
/// mediator sees; the store only ever sees the process rid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxId(u64);

impl TxId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        Self(NEXT_TX_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// A claim this transaction wrote, and whether it has been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistentLockStatus {
    claim: TimestampRid,
    write_completed: Timestamp,
    checked: bool,
}

impl ConsistentLockStatus {
    pub fn new(claim: TimestampRid, write_completed: Timestamp) -> Self {
        Self {
            claim,
            write_completed,
            checked: false,
        }
    }

    pub fn claim(&self) -> &TimestampRid {
        &self.claim
    }

    /// Timestamp encoded in the claim column.
    pub fn write_timestamp(&self) -> Timestamp {
        self.claim.timestamp()
    }

    /// When the store acknowledged the claim write.
    pub fn write_completed(&self) -> Timestamp {
        self.write_completed
    }

    pub fn is_checked(&self) -> bool {
        self.checked
    }

    pub fn set_checked(&mut self) {
        self.checked = true;
    }
}

/// Claims held by one transaction through one locker.
#[derive(Debug, Clone, Default)]
pub struct LockerState {
    locks: HashMap<KeyColumn, ConsistentLockStatus>,
}

impl LockerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, target: &KeyColumn) -> bool {
        self.locks.contains_key(target)
    }

    pub fn get(&self, target: &KeyColumn) -> Option<&ConsistentLockStatus> {
        self.locks.get(target)
    }

    pub fn insert(&mut self, target: KeyColumn, status: ConsistentLockStatus) {
        self.locks.insert(target, status);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&KeyColumn, &ConsistentLockStatus)> {
        self.locks.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&KeyColumn, &mut ConsistentLockStatus)> {
        self.locks.iter_mut()
    }

    /// Remove and return every entry.
    pub fn drain(&mut self) -> Vec<(KeyColumn, ConsistentLockStatus)> {
        self.locks.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
