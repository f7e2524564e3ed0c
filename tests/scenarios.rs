//! End-to-end locking scenarios across simulated processes.

mod common;

use bytes::Bytes;
use common::{EXPIRE, START, WAIT};
use kcv_locking::cli::commands::simulate;
use kcv_locking::core::error::LockFailure;
use kcv_locking::core::time::{
    ManualTimestamps, SystemTimestamps, Timestamp, TimestampProvider, TimestampResolution,
};
use kcv_locking::locking::{
    ConsistentKeyLocker, ConsistentKeyLockerSerializer, KeyColumn, Locker, LockerState,
    TimestampRid, TxId,
};
use kcv_locking::store::memory::InMemoryStoreManager;
use kcv_locking::store::{Entry, KeyColumnValueStore, TxConfig};
use kcv_locking::txn::LOCK_STORE_SUFFIX;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

const STORE: &str = "graph";

fn v(s: &'static str) -> Bytes {
    Bytes::from_static(s.as_bytes())
}

#[test]
fn earlier_claim_wins_and_later_claim_aborts() {
    let backend = Arc::new(InMemoryStoreManager::new());
    let times = common::manual_clock();
    let a = common::process(&backend, &times, "process-a");
    let b = common::process(&backend, &times, "process-b");
    let store_a = a.open_locking(STORE).unwrap();
    let store_b = b.open_locking(STORE).unwrap();

    let mut tx_a = a.begin_transaction(TxConfig::default()).unwrap();
    let mut tx_b = b.begin_transaction(TxConfig::default()).unwrap();

    store_a.acquire_lock(v("k"), v("c"), None, &mut tx_a).unwrap();
    times.advance(Duration::from_millis(1));
    store_b.acquire_lock(v("k"), v("c"), None, &mut tx_b).unwrap();

    // B checks while A's claim is still in place.
    let err = store_b
        .mutate(b"k", &[Entry::new(v("c"), v("from-b"))], &[], &mut tx_b)
        .unwrap_err();
    assert!(!err.is_retriable());
    match err.failure() {
        LockFailure::AlreadyHeld { winner, .. } => {
            assert_eq!(winner, &TimestampRid::new(START, v("process-a")));
        }
        other => panic!("unexpected failure: {other}"),
    }
    tx_b.rollback().unwrap();

    store_a
        .mutate(b"k", &[Entry::new(v("c"), v("from-a"))], &[], &mut tx_a)
        .unwrap();
    tx_a.commit().unwrap();

    assert_eq!(backend.store(STORE).value(b"k", b"c"), Some(v("from-a")));
    assert_eq!(backend.store("graph_lock_").column_count(), 0);
}

#[test]
fn late_claim_after_winner_committed_fails_on_expected_value() {
    let backend = Arc::new(InMemoryStoreManager::new());
    let times = common::manual_clock();
    let a = common::process(&backend, &times, "process-a");
    let b = common::process(&backend, &times, "process-b");
    let store_a = a.open_locking(STORE).unwrap();
    let store_b = b.open_locking(STORE).unwrap();

    let mut tx_a = a.begin_transaction(TxConfig::default()).unwrap();
    let mut tx_b = b.begin_transaction(TxConfig::default()).unwrap();

    // Both read the position as absent before either locks it.
    store_a.acquire_lock(v("k"), v("c"), None, &mut tx_a).unwrap();
    store_a
        .mutate(b"k", &[Entry::new(v("c"), v("from-a"))], &[], &mut tx_a)
        .unwrap();
    tx_a.commit().unwrap();

    store_b.acquire_lock(v("k"), v("c"), None, &mut tx_b).unwrap();
    let err = tx_b.prepare_for_mutations().unwrap_err();
    assert!(!err.is_retriable());
    assert!(matches!(err.failure(), LockFailure::ExpectedValueMismatch { .. }));
    tx_b.rollback().unwrap();

    assert_eq!(backend.store(STORE).value(b"k", b"c"), Some(v("from-a")));
}

#[test]
fn crashed_holder_blocks_until_its_claim_expires() {
    let backend = Arc::new(InMemoryStoreManager::new());
    let times = common::manual_clock();

    // The crashed process takes a lock and disappears without cleaning up.
    {
        let crashed = common::process(&backend, &times, "process-c");
        let store = crashed.open_locking(STORE).unwrap();
        let mut tx = crashed.begin_transaction(TxConfig::default()).unwrap();
        store.acquire_lock(v("k"), v("c"), None, &mut tx).unwrap();
        std::mem::forget(tx);
    }
    assert_eq!(backend.store("graph_lock_").column_count(), 1);

    let a = common::process(&backend, &times, "process-a");
    let store = a.open_locking(STORE).unwrap();

    times.advance(Duration::from_secs(1));
    let mut tx = a.begin_transaction(TxConfig::default()).unwrap();
    store.acquire_lock(v("k"), v("c"), None, &mut tx).unwrap();
    let err = tx.prepare_for_mutations().unwrap_err();
    assert!(matches!(err.failure(), LockFailure::AlreadyHeld { .. }));
    tx.rollback().unwrap();

    times.advance(EXPIRE);
    let mut tx = a.begin_transaction(TxConfig::default()).unwrap();
    store.acquire_lock(v("k"), v("c"), None, &mut tx).unwrap();
    store
        .mutate(b"k", &[Entry::new(v("c"), v("from-a"))], &[], &mut tx)
        .unwrap();
    tx.commit().unwrap();

    // Dropping the manager stops its cleaner after queued cleanups finish.
    drop(store);
    drop(a);
    assert_eq!(backend.store("graph_lock_").column_count(), 0);
    assert_eq!(backend.store(STORE).value(b"k", b"c"), Some(v("from-a")));
}

#[test]
fn retry_after_temporary_contention_succeeds() {
    let backend = Arc::new(InMemoryStoreManager::new());
    let times = common::manual_clock();
    let a = common::process(&backend, &times, "process-a");
    let store = a.open_locking(STORE).unwrap();

    let mut holder = a.begin_transaction(TxConfig::default()).unwrap();
    store.acquire_lock(v("k"), v("c"), None, &mut holder).unwrap();

    let mut contender = a.begin_transaction(TxConfig::default()).unwrap();
    let err = store.acquire_lock(v("k"), v("c"), None, &mut contender).unwrap_err();
    assert!(err.is_retriable());
    contender.rollback().unwrap();

    holder.rollback().unwrap();

    let mut retry = a.begin_transaction(TxConfig::default()).unwrap();
    store.acquire_lock(v("k"), v("c"), None, &mut retry).unwrap();
    store
        .mutate(b"k", &[Entry::new(v("c"), v("retried"))], &[], &mut retry)
        .unwrap();
    retry.commit().unwrap();
    assert_eq!(backend.store(STORE).value(b"k", b"c"), Some(v("retried")));
}

#[test]
fn concurrent_processes_elect_exactly_one_winner() {
    let config = common::process_config("unused");
    let times: Arc<dyn TimestampProvider> =
        Arc::new(SystemTimestamps::new(TimestampResolution::Micro));

    let report = simulate(&config, times, 6, "k", "c").unwrap();

    assert_eq!(report.winners.len(), 1, "report: {report:?}");
    assert_eq!(report.losers.len(), 5);
    assert!(report.losers.iter().all(|l| l.error.is_some()));
    let winner = &report.winners[0];
    assert_eq!(
        report.final_value.as_deref(),
        Some(format!("sim-{}", winner.contender).as_str())
    );
    assert_eq!(report.leftover_claims, 0);
}

#[test]
fn lock_rows_live_in_the_companion_store() {
    let backend = Arc::new(InMemoryStoreManager::new());
    let times = common::manual_clock();
    let a = common::process(&backend, &times, "process-a");
    let store = a.open_locking(STORE).unwrap();
    let mut tx = a.begin_transaction(TxConfig::default()).unwrap();

    store.acquire_lock(v("k"), v("c"), None, &mut tx).unwrap();

    let lock_store = backend.store(&format!("{STORE}{LOCK_STORE_SUFFIX}"));
    let lock_key = ConsistentKeyLockerSerializer.to_lock_key(b"k", b"c");
    let row = lock_store.row(&lock_key);
    assert_eq!(row.len(), 1);
    assert_eq!(
        ConsistentKeyLockerSerializer
            .decode_with(&row[0].column, TimestampResolution::Micro)
            .unwrap(),
        TimestampRid::new(START, v("process-a"))
    );
    assert_eq!(backend.store(STORE).row_count(), 0);
    tx.rollback().unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whatever order claims are written in, only the smallest `(timestamp,
    /// rid)` passes its check.
    #[test]
    fn only_the_smallest_claim_wins(
        claims in prop::collection::vec((0u64..20_000, 0u8..3), 2..6)
    ) {
        let backend = InMemoryStoreManager::new();
        let store = backend.store("graph_lock_");
        let tx = common::strong_tx(&backend);
        let target = KeyColumn::new(v("k"), v("c"));

        let mut contenders = Vec::new();
        for (i, (offset_us, tag)) in claims.iter().enumerate() {
            let clock = Arc::new(ManualTimestamps::new(
                START.plus(Duration::from_micros(*offset_us)),
                TimestampResolution::Micro,
            ));
            let rid = Bytes::from(format!("{tag}-{i}"));
            let locker = ConsistentKeyLocker::builder(
                store.clone() as Arc<dyn KeyColumnValueStore>,
                clock as Arc<dyn TimestampProvider>,
            )
            .rid(rid.clone())
            .lock_wait(WAIT)
            .lock_expire(EXPIRE)
            .build();
            let mut state = LockerState::new();
            locker.write_lock(&target, TxId::next(), &mut state, &tx).unwrap();
            let claim = TimestampRid::new(
                START.plus(Duration::from_micros(*offset_us)),
                rid,
            );
            contenders.push((locker, state, claim));
        }

        let smallest = contenders.iter().map(|(_, _, c)| c.clone()).min().unwrap();
        let mut winners = 0;
        for (locker, state, claim) in contenders.iter_mut() {
            let result = locker.check_locks(state, &tx);
            if *claim == smallest {
                prop_assert!(result.is_ok(), "smallest claim {} failed: {:?}", claim, result);
                winners += 1;
            } else {
                prop_assert!(result.is_err(), "claim {} beat {}", claim, smallest);
            }
        }
        prop_assert_eq!(winners, 1);
    }

    /// Column byte order equals claim order.
    #[test]
    fn column_order_matches_claim_order(
        a in (0u64..1_000_000, prop::collection::vec(any::<u8>(), 0..8)),
        b in (0u64..1_000_000, prop::collection::vec(any::<u8>(), 0..8)),
    ) {
        let ca = TimestampRid::new(Timestamp::from_micros(a.0), a.1);
        let cb = TimestampRid::new(Timestamp::from_micros(b.0), b.1);
        let ea = ConsistentKeyLockerSerializer.encode_with(ca.timestamp(), ca.rid(), TimestampResolution::Micro);
        let eb = ConsistentKeyLockerSerializer.encode_with(cb.timestamp(), cb.rid(), TimestampResolution::Micro);
        prop_assert_eq!(ca.cmp(&cb), ea.cmp(&eb));
    }
}
