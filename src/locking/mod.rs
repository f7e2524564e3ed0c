//! Distributed locks over a key-consistent store.
//!
//! - [`claim`] - Lock targets and timestamped claims
//! - [`codec`] - Stored form of lock keys and claim columns
//! - [`mediator`] - In-process contention short-circuit
//! - [`status`] - Per-transaction lock bookkeeping
//! - [`locker`] - The write/check/delete protocol
//! - [`cleaner`] - Background removal of abandoned claims

pub mod claim;
pub mod cleaner;
pub mod codec;
pub mod locker;
pub mod mediator;
pub mod status;

pub use claim::{KeyColumn, TimestampRid};
pub use cleaner::{LockCleanerService, LockCleanupJob, StandardLockCleanerService};
pub use codec::ConsistentKeyLockerSerializer;
pub use locker::{ConsistentKeyLocker, ConsistentKeyLockerBuilder, Locker};
pub use mediator::{LocalLockMediator, LocalLockMediators};
pub use status::{ConsistentLockStatus, LockerState, TxId};
