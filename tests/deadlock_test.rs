// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Deadlock and contention tests using parking_lot's built-in deadlock detector.
//!
//! These tests drive the real store, cascades and schema upgrades from many
//! threads at once while a background thread watches the lock graph.

use chrono::NaiveDate;
use ledger_store_rs::{
    Collection, Engine, EntryKind, ErrorKind, NO_BANK, NameKind, NewMovement, Operation, RecordKey,
    Settings, Store, StoreOptions,
};
use parking_lot::deadlock;
use rayon::prelude::*;
use rust_decimal_macros::dec;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::Duration;

// === Deadlock Detection Infrastructure ===

/// Starts a background thread that checks for deadlocks.
/// Returns a handle to stop the detector.
fn start_deadlock_detector() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = running.clone();

    thread::spawn(move || {
        while running_clone.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(100));
            let deadlocks = deadlock::check_deadlock();
            if !deadlocks.is_empty() {
                eprintln!("\n=== DEADLOCK DETECTED ===");
                for (i, threads) in deadlocks.iter().enumerate() {
                    eprintln!("\nDeadlock #{}", i + 1);
                    for t in threads {
                        eprintln!("Thread ID: {:?}", t.thread_id());
                        eprintln!("Backtrace:\n{:#?}", t.backtrace());
                    }
                }
                panic!("Deadlock detected! See output above for details.");
            }
        }
    });

    running
}

/// Stops the deadlock detector.
fn stop_deadlock_detector(running: Arc<AtomicBool>) {
    running.store(false, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150));
}

fn expense(bank: Option<&str>) -> NewMovement {
    let movement = NewMovement::new(
        "Coffee",
        dec!(3.50),
        EntryKind::Expense,
        NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
    )
    .category("Food");
    match bank {
        Some(bank) => movement.bank(bank),
        None => movement,
    }
}

// === Tests ===

/// Concurrent creates never hand out the same id twice.
#[test]
fn concurrent_creates_get_unique_ids() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::in_memory());

    const NUM_THREADS: usize = 8;
    const OPS_PER_THREAD: usize = 50;

    let ids: Vec<u64> = (0..NUM_THREADS * OPS_PER_THREAD)
        .into_par_iter()
        .map(|_| engine.add_movement(expense(Some("BankA"))).unwrap().value.0)
        .collect();

    stop_deadlock_detector(detector);

    let unique: BTreeSet<u64> = ids.iter().copied().collect();
    assert_eq!(unique.len(), NUM_THREADS * OPS_PER_THREAD);
    assert_eq!(unique.iter().next_back(), Some(&((NUM_THREADS * OPS_PER_THREAD) as u64)));
    assert_eq!(engine.banks().unwrap(), vec!["BankA".to_string()]);
}

/// Racing callers for the same missing collection converge on one upgrade.
#[test]
fn concurrent_ensure_collection_upgrades_once() {
    let detector = start_deadlock_detector();
    let store = Arc::new(Store::in_memory());
    let before = store.version().unwrap();

    const NUM_THREADS: usize = 16;
    let barrier = Arc::new(Barrier::new(NUM_THREADS));
    let created = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let store = store.clone();
            let barrier = barrier.clone();
            let created = created.clone();
            thread::spawn(move || {
                barrier.wait();
                if store.ensure_collection(Collection::Investments).unwrap() {
                    created.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    stop_deadlock_detector(detector);

    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(store.version().unwrap(), before + 1);
    let upgrades = store
        .journal()
        .drain()
        .into_iter()
        .filter(|m| m.operation == Operation::CreateCollection)
        .count();
    assert_eq!(upgrades, 1);
}

/// Cascades interleaved with writers and readers keep references consistent.
#[test]
fn no_deadlock_cascades_during_writes() {
    let detector = start_deadlock_detector();
    let engine = Arc::new(Engine::in_memory());
    for _ in 0..10 {
        engine.add_movement(expense(Some("BankA"))).unwrap();
    }

    const RENAMES: usize = 20;
    const WRITERS: usize = 4;
    const OPS_PER_WRITER: usize = 50;

    let renamer = {
        let engine = engine.clone();
        thread::spawn(move || {
            for i in 0..RENAMES {
                let (from, to) = if i % 2 == 0 {
                    ("BankA", "BankB")
                } else {
                    ("BankB", "BankA")
                };
                let report = engine.rename(NameKind::Bank, from, to).unwrap().value;
                assert_eq!(report.movements, 10);
            }
        })
    };

    let writers: Vec<_> = (0..WRITERS)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || {
                for i in 0..OPS_PER_WRITER {
                    if i % 2 == 0 {
                        engine.add_movement(expense(None)).unwrap();
                    } else {
                        let views = engine.views().unwrap();
                        assert_eq!(
                            views.global_balance,
                            -dec!(3.50) * rust_decimal::Decimal::from(views.movement_count)
                        );
                    }
                }
            })
        })
        .collect();

    renamer.join().expect("Renamer panicked");
    for handle in writers {
        handle.join().expect("Writer panicked");
    }

    stop_deadlock_detector(detector);

    let integrity = engine.integrity();
    assert_eq!(integrity.references(NameKind::Bank, "BankA").unwrap(), 10);
    assert_eq!(integrity.references(NameKind::Bank, "BankB").unwrap(), 0);
    assert_eq!(
        integrity.references(NameKind::Bank, NO_BANK).unwrap(),
        WRITERS * OPS_PER_WRITER / 2
    );
}

/// A caller blocked behind a long transaction gives up after the lock timeout.
#[test]
fn lock_timeout_reports_storage_unavailable() {
    let store = Arc::new(
        Store::open(StoreOptions::in_memory().lock_timeout(Duration::from_millis(50))).unwrap(),
    );
    let (started, wait_started) = mpsc::channel();

    let holder = {
        let store = store.clone();
        thread::spawn(move || {
            store
                .transaction(&[Collection::Movements], |_tx| {
                    started.send(()).unwrap();
                    thread::sleep(Duration::from_millis(400));
                    Ok(())
                })
                .unwrap();
        })
    };

    wait_started.recv().unwrap();
    let error = store.count(Collection::Movements).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::StorageUnavailable);

    holder.join().expect("Holder panicked");
    assert_eq!(store.count(Collection::Movements).unwrap(), 0);
}

/// Readers proceed in parallel with each other.
#[test]
fn no_deadlock_parallel_reads() {
    let detector = start_deadlock_detector();
    let store = Arc::new(Store::in_memory());
    let engine = Engine::new(store.clone(), Arc::new(Settings::new()));
    engine.add_category("Food").unwrap();

    (0..1_000).into_par_iter().for_each(|_| {
        assert!(
            store
                .read_one(Collection::Categories, &RecordKey::name("Food"))
                .is_ok()
        );
        assert_eq!(store.count(Collection::Categories).unwrap(), 1);
    });

    stop_deadlock_detector(detector);
}
