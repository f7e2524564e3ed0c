//! Expected-value-checking transactions.
//!
//! - [`transaction`] - Lock bookkeeping, verification and lifecycle
//! - [`store`] - Store wrapper routing locks and writes through a transaction
//! - [`manager`] - Opens locking stores and begins transactions

pub mod manager;
pub mod store;
pub mod transaction;

pub use crate::locking::status::TxId;
pub use manager::{ExpectedValueCheckingStoreManager, LOCK_STORE_SUFFIX};
pub use store::ExpectedValueCheckingStore;
pub use transaction::{ExpectedValueCheckingTransaction, TxPhase};
