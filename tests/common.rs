//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use kcv_locking::core::config::Config;
use kcv_locking::core::time::{ManualTimestamps, Timestamp, TimestampProvider, TimestampResolution};
use kcv_locking::locking::{ConsistentKeyLocker, LocalLockMediator, TxId};
use kcv_locking::store::memory::{InMemoryStore, InMemoryStoreManager};
use kcv_locking::store::{KeyColumnValueStore, StoreManager, StoreTx, TxConfig};
use kcv_locking::txn::ExpectedValueCheckingStoreManager;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Propagation delay used throughout the tests.
pub const WAIT: Duration = Duration::from_millis(100);

/// Expiry threshold used throughout the tests.
pub const EXPIRE: Duration = Duration::from_secs(10);

/// Start of the fabricated clock.
pub const START: Timestamp = Timestamp::from_millis(1_700_000_000_000);

/// Write `content` to a temporary config file.
pub fn config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}

/// A fabricated clock at [`START`] with microsecond resolution.
pub fn manual_clock() -> Arc<ManualTimestamps> {
    Arc::new(ManualTimestamps::new(START, TimestampResolution::Micro))
}

/// Configuration for one simulated process.
pub fn process_config(instance_id: &str) -> Config {
    let mut config = Config::default();
    config.locking.instance_id = Some(instance_id.to_string());
    config.locking.wait_ms = WAIT.as_millis() as u64;
    config.locking.expire_ms = EXPIRE.as_millis() as u64;
    config
}

/// One simulated process: its own manager, rid and mediators over a shared
/// backend.
pub fn process(
    backend: &Arc<InMemoryStoreManager>,
    times: &Arc<ManualTimestamps>,
    instance_id: &str,
) -> ExpectedValueCheckingStoreManager {
    process_with_config(backend, times, process_config(instance_id))
}

pub fn process_with_config(
    backend: &Arc<InMemoryStoreManager>,
    times: &Arc<ManualTimestamps>,
    config: Config,
) -> ExpectedValueCheckingStoreManager {
    ExpectedValueCheckingStoreManager::new(
        backend.clone() as Arc<dyn StoreManager>,
        config,
        times.clone() as Arc<dyn TimestampProvider>,
    )
}

/// A bare locker over `store` with the test timings.
pub fn locker(
    store: &Arc<InMemoryStore>,
    times: &Arc<ManualTimestamps>,
    rid: &'static str,
) -> ConsistentKeyLocker {
    ConsistentKeyLocker::builder(
        store.clone() as Arc<dyn KeyColumnValueStore>,
        times.clone() as Arc<dyn TimestampProvider>,
    )
    .rid(rid.as_bytes())
    .lock_wait(WAIT)
    .lock_expire(EXPIRE)
    .build()
}

/// A bare locker sharing `mediator` with other lockers of the same process.
pub fn locker_with_mediator(
    store: &Arc<InMemoryStore>,
    times: &Arc<ManualTimestamps>,
    rid: &'static str,
    mediator: Arc<LocalLockMediator<TxId>>,
) -> ConsistentKeyLocker {
    ConsistentKeyLocker::builder(
        store.clone() as Arc<dyn KeyColumnValueStore>,
        times.clone() as Arc<dyn TimestampProvider>,
    )
    .rid(rid.as_bytes())
    .lock_wait(WAIT)
    .lock_expire(EXPIRE)
    .mediator(mediator)
    .build()
}

/// A key-consistent transaction on `backend`.
pub fn strong_tx(backend: &InMemoryStoreManager) -> StoreTx {
    backend
        .begin_transaction(TxConfig::key_consistent())
        .expect("Failed to begin transaction")
}
