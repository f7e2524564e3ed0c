//! kcv-locking - distributed locks and checked writes over key-column-value stores.
//!
//! Many wide-column stores offer nothing stronger than key-consistent reads
//! and writes: no compare-and-set, no cross-row transactions. This crate
//! builds mutual exclusion on top of exactly that. A transaction writes a
//! timestamped claim next to the data it wants to protect, waits out the
//! store's propagation delay, and reads the claims back; the oldest live claim
//! wins. Before the first write, the transaction also confirms that every
//! locked position still holds the value it was expected to hold.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Expected-Value-Checking Layer                  │
//! │        Store Manager │ Store Wrapper │ Transaction Lifecycle    │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Consistent-Key Locker                       │
//! │   Local Mediator │ Claim Codec │ Write/Check/Delete │ Cleaner   │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Key-Column-Value Store Interface               │
//! │          get_slice │ mutate │ key-consistent transactions       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::error`] - Temporary/permanent error classification
//! - [`core::time`] - Timestamps and injectable time sources
//! - [`core::backend_op`] - Bounded, retrying store calls
//!
//! ## Store
//! - [`store`] - Key-column-value store traits
//! - [`store::memory`] - Ordered in-memory backend
//!
//! ## Locking
//! - [`locking::locker`] - Consistent-key lock protocol
//! - [`locking::mediator`] - In-process contention
//! - [`locking::codec`] - Claim encoding
//! - [`locking::cleaner`] - Abandoned claim removal
//!
//! ## Transactions
//! - [`txn::transaction`] - Expected-value-checking transaction
//! - [`txn::store`] - Locking store wrapper
//! - [`txn::manager`] - Store and transaction factory
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations
//!
//! # Key Invariants
//!
//! - Claims on a target are ordered by `(timestamp, rid)`; the smallest
//!   non-expired claim holds the lock
//! - A claim is only judged after the propagation delay has passed since it
//!   was written
//! - Locks are checked once, before the first mutation; no locks may be
//!   taken after it
//! - Lock records are deleted on every exit path of a transaction

// Core infrastructure
pub mod core;

// Store interface and backends
pub mod store;

// Consistent-key locking
pub mod locking;

// Expected-value-checking transactions
pub mod txn;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{backend_op, config, error, time};
pub use self::core::error::{BackendError, LockFailure, LockResult, LockingError};
pub use locking::{ConsistentKeyLocker, KeyColumn, Locker, TimestampRid};
pub use txn::{
    ExpectedValueCheckingStore, ExpectedValueCheckingStoreManager, ExpectedValueCheckingTransaction,
};
