//! Key-column-value store interface.
//!
//! The locking layer never talks to a concrete backend. It needs three
//! primitives from whatever store sits underneath:
//! - ordered column slices of a single row ([`KeyColumnValueStore::get_slice`])
//! - batched single-row writes ([`KeyColumnValueStore::mutate`])
//! - transaction handles, one of which offers key-consistent reads and writes
//!   ([`StoreManager::begin_transaction`])
//!
//! [`memory`] provides an ordered in-memory implementation.

pub mod memory;

use crate::core::error::BackendResult;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// A single column and its value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entry {
    pub column: Bytes,
    pub value: Bytes,
}

impl Entry {
    pub fn new(column: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// Columns `[start, end)` of one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySliceQuery {
    pub key: Bytes,
    pub start: Bytes,
    pub end: Bytes,
    pub limit: Option<usize>,
}

impl KeySliceQuery {
    pub fn new(key: impl Into<Bytes>, start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            start: start.into(),
            end: end.into(),
            limit: None,
        }
    }

    /// Query exactly one column of `key`.
    pub fn single_column(key: impl Into<Bytes>, column: &[u8]) -> Self {
        Self::new(key, Bytes::copy_from_slice(column), next_bigger(column))
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Smallest byte string of the same length that sorts after `buf`, used as an
/// exclusive upper bound covering `buf` and anything it prefixes.
///
/// Trailing `0xFF` bytes roll over; a buffer of only `0xFF` bytes has no
/// bigger sibling of the same length, so one `0x00` byte is appended instead.
pub fn next_bigger(buf: &[u8]) -> Bytes {
    let mut next = buf.to_vec();
    for i in (0..next.len()).rev() {
        if next[i] == 0xFF {
            next[i] = 0x00;
        } else {
            next[i] += 1;
            return Bytes::from(next);
        }
    }
    let mut widened = buf.to_vec();
    widened.push(0x00);
    Bytes::from(widened)
}

/// Read consistency requested for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Consistency {
    /// Whatever the backend provides by default; possibly eventually consistent.
    #[default]
    Default,
    /// Read-after-write on individual keys. Used for lock metadata and
    /// expected-value reads.
    KeyConsistent,
}

/// Options for a new store transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxConfig {
    pub consistency: Consistency,
    /// Optional label for metrics and logs.
    pub group_name: Option<String>,
}

impl TxConfig {
    pub fn key_consistent() -> Self {
        Self {
            consistency: Consistency::KeyConsistent,
            group_name: None,
        }
    }

    pub fn with_group_name(mut self, group: impl Into<String>) -> Self {
        self.group_name = Some(group.into());
        self
    }
}

/// A backend transaction handle.
///
/// Handles are shared (see [`StoreTx`]) so best-effort background work can
/// hold on to one after the caller has moved on.
pub trait StoreTransaction: Send + Sync + fmt::Debug {
    fn config(&self) -> &TxConfig;

    fn commit(&self) -> BackendResult<()>;

    fn rollback(&self) -> BackendResult<()>;
}

/// Shared transaction handle.
pub type StoreTx = Arc<dyn StoreTransaction>;

/// Ordered key-column-value store.
pub trait KeyColumnValueStore: Send + Sync {
    /// Store name, unique within its manager.
    fn name(&self) -> &str;

    /// Entries of `query.key` whose column falls in `[query.start, query.end)`,
    /// in ascending column order.
    fn get_slice(&self, query: &KeySliceQuery, tx: &dyn StoreTransaction)
        -> BackendResult<Vec<Entry>>;

    /// Apply deletions, then additions, to a single row.
    fn mutate(
        &self,
        key: &[u8],
        additions: &[Entry],
        deletions: &[Bytes],
        tx: &dyn StoreTransaction,
    ) -> BackendResult<()>;
}

/// Opens stores and begins transactions against one backend.
pub trait StoreManager: Send + Sync {
    fn name(&self) -> &str;

    fn open_store(&self, name: &str) -> BackendResult<Arc<dyn KeyColumnValueStore>>;

    fn begin_transaction(&self, config: TxConfig) -> BackendResult<StoreTx>;
}
