//! Ordered in-memory key-column-value backend.
//!
//! Each store keeps an index of `row → (column → value)` in nested `BTreeMap`s
//! so slices come back in column order, which the lock protocol relies on.
//! Writes are applied immediately regardless of transaction; transactions only
//! record how they finished.
//!
//! Stores support fault injection so tests and simulations can exercise
//! retry, timeout and cleanup paths.

use crate::core::error::{BackendError, BackendResult};
use crate::store::{
    Entry, KeyColumnValueStore, KeySliceQuery, StoreManager, StoreTransaction, StoreTx, TxConfig,
};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

type Row = BTreeMap<Bytes, Bytes>;

/// Callback run before every mutation, with the mutated row key.
pub type MutationHook = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// In-memory store.
pub struct InMemoryStore {
    name: String,

    /// In-memory index: row key → columns.
    rows: RwLock<BTreeMap<Bytes, Row>>,

    /// Injected failures, consumed one per operation.
    read_faults: Mutex<VecDeque<BackendError>>,
    write_faults: Mutex<VecDeque<BackendError>>,

    mutation_hook: RwLock<Option<MutationHook>>,

    reads: AtomicU64,
    writes: AtomicU64,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: RwLock::new(BTreeMap::new()),
            read_faults: Mutex::new(VecDeque::new()),
            write_faults: Mutex::new(VecDeque::new()),
            mutation_hook: RwLock::new(None),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Fail the next `n` slice reads with `error`.
    pub fn fail_next_reads(&self, n: usize, error: BackendError) {
        let mut faults = self.read_faults.lock();
        faults.extend(std::iter::repeat(error).take(n));
    }

    /// Fail the next `n` mutations with `error`.
    pub fn fail_next_writes(&self, n: usize, error: BackendError) {
        let mut faults = self.write_faults.lock();
        faults.extend(std::iter::repeat(error).take(n));
    }

    /// Discard all pending injected failures.
    pub fn clear_faults(&self) {
        self.read_faults.lock().clear();
        self.write_faults.lock().clear();
    }

    /// Install or remove the mutation hook.
    pub fn set_mutation_hook(&self, hook: Option<MutationHook>) {
        *self.mutation_hook.write() = hook;
    }

    /// Write a column directly, bypassing transactions and faults.
    pub fn put(&self, key: impl Into<Bytes>, column: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.rows
            .write()
            .entry(key.into())
            .or_default()
            .insert(column.into(), value.into());
    }

    /// All entries of a row, in column order.
    pub fn row(&self, key: &[u8]) -> Vec<Entry> {
        self.rows
            .read()
            .get(key)
            .map(|row| {
                row.iter()
                    .map(|(c, v)| Entry::new(c.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Value of a single column.
    pub fn value(&self, key: &[u8], column: &[u8]) -> Option<Bytes> {
        self.rows.read().get(key).and_then(|row| row.get(column).cloned())
    }

    /// Number of non-empty rows.
    pub fn row_count(&self) -> usize {
        self.rows.read().len()
    }

    /// Total number of columns across all rows.
    pub fn column_count(&self) -> usize {
        self.rows.read().values().map(|row| row.len()).sum()
    }

    /// Number of slice reads served or failed.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of mutations applied or failed.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl KeyColumnValueStore for InMemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_slice(
        &self,
        query: &KeySliceQuery,
        _tx: &dyn StoreTransaction,
    ) -> BackendResult<Vec<Entry>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if let Some(err) = self.read_faults.lock().pop_front() {
            return Err(err);
        }
        if query.start >= query.end {
            return Ok(Vec::new());
        }

        let rows = self.rows.read();
        let Some(row) = rows.get(&query.key) else {
            return Ok(Vec::new());
        };

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(row
            .range(query.start.clone()..query.end.clone())
            .take(limit)
            .map(|(c, v)| Entry::new(c.clone(), v.clone()))
            .collect())
    }

    fn mutate(
        &self,
        key: &[u8],
        additions: &[Entry],
        deletions: &[Bytes],
        _tx: &dyn StoreTransaction,
    ) -> BackendResult<()> {
        let hook = self.mutation_hook.read().clone();
        if let Some(hook) = hook {
            hook(key);
        }

        self.writes.fetch_add(1, Ordering::Relaxed);
        if let Some(err) = self.write_faults.lock().pop_front() {
            return Err(err);
        }

        let mut rows = self.rows.write();
        let row_key = Bytes::copy_from_slice(key);
        let row = rows.entry(row_key.clone()).or_default();
        for column in deletions {
            row.remove(column);
        }
        for entry in additions {
            row.insert(entry.column.clone(), entry.value.clone());
        }
        if row.is_empty() {
            rows.remove(&row_key);
        }
        Ok(())
    }
}

const TX_OPEN: u8 = 0;
const TX_COMMITTED: u8 = 1;
const TX_ROLLED_BACK: u8 = 2;

/// Outcome of an in-memory transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Open,
    Committed,
    RolledBack,
}

/// In-memory transaction handle.
#[derive(Debug)]
pub struct InMemoryTransaction {
    id: u64,
    config: TxConfig,
    state: AtomicU8,
}

impl InMemoryTransaction {
    pub fn new(id: u64, config: TxConfig) -> Self {
        Self {
            id,
            config,
            state: AtomicU8::new(TX_OPEN),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn outcome(&self) -> TxOutcome {
        match self.state.load(Ordering::Acquire) {
            TX_COMMITTED => TxOutcome::Committed,
            TX_ROLLED_BACK => TxOutcome::RolledBack,
            _ => TxOutcome::Open,
        }
    }

    fn finish(&self, to: u8) -> BackendResult<()> {
        self.state
            .compare_exchange(TX_OPEN, to, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| BackendError::permanent(format!("transaction {} already closed", self.id)))
    }
}

impl StoreTransaction for InMemoryTransaction {
    fn config(&self) -> &TxConfig {
        &self.config
    }

    fn commit(&self) -> BackendResult<()> {
        self.finish(TX_COMMITTED)
    }

    fn rollback(&self) -> BackendResult<()> {
        self.finish(TX_ROLLED_BACK)
    }
}

/// Manager for a set of in-memory stores.
pub struct InMemoryStoreManager {
    name: String,
    stores: RwLock<HashMap<String, Arc<InMemoryStore>>>,
    // Only populated when recording was requested.
    transactions: Option<Mutex<Vec<Arc<InMemoryTransaction>>>>,
    next_tx_id: AtomicU64,
}

impl InMemoryStoreManager {
    pub fn new() -> Self {
        Self::with_name("inmemory")
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stores: RwLock::new(HashMap::new()),
            transactions: None,
            next_tx_id: AtomicU64::new(1),
        }
    }

    /// Get or create a store, returning the concrete type.
    pub fn store(&self, name: &str) -> Arc<InMemoryStore> {
        if let Some(store) = self.stores.read().get(name) {
            return store.clone();
        }
        self.stores
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(InMemoryStore::new(name)))
            .clone()
    }

    /// Keep a handle to every transaction begun from now on so its outcome
    /// can be inspected later. Handles are never released.
    pub fn recording_transactions(mut self) -> Self {
        self.transactions = Some(Mutex::new(Vec::new()));
        self
    }

    /// Every recorded transaction, oldest first. Empty unless
    /// [`recording_transactions`](Self::recording_transactions) was enabled.
    pub fn transactions(&self) -> Vec<Arc<InMemoryTransaction>> {
        self.transactions
            .as_ref()
            .map(|recorded| recorded.lock().clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryStoreManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreManager for InMemoryStoreManager {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_store(&self, name: &str) -> BackendResult<Arc<dyn KeyColumnValueStore>> {
        Ok(self.store(name))
    }

    fn begin_transaction(&self, config: TxConfig) -> BackendResult<StoreTx> {
        let id = self.next_tx_id.fetch_add(1, Ordering::Relaxed);
        let tx = Arc::new(InMemoryTransaction::new(id, config));
        if let Some(recorded) = &self.transactions {
            recorded.lock().push(tx.clone());
        }
        Ok(tx)
    }
}
