//! End-to-end scenarios across the MXUser primitives
//!
//! Each test builds its own primitives with unique names, so the tests can
//! share the process-wide registry while running in parallel.

use crossbeam_utils::thread as crossbeam_thread;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mxuser::{
    any_locks_held, catch_fatal, held_locks, list_locks, set_try_acquire_failure_hook, Barrier,
    ExclusiveLock, LockKind, RankLock, ReadWriteLock, RecursiveLock, RwQuery, Semaphore, SingletonCell,
    MAX_REC_DEPTH,
};

// =============================================================================
// MUTUAL EXCLUSION
// =============================================================================

#[test]
fn test_exclusive_lock_serializes_critical_sections() {
    const THREADS: usize = 8;
    const ITERATIONS: usize = 2_000;

    let lock = ExclusiveLock::create("scenario.exclusion", 0x100);
    let inside = AtomicU32::new(0);
    let total = AtomicUsize::new(0);

    crossbeam_thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|_| {
                for _ in 0..ITERATIONS {
                    let _guard = lock.lock();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    total.fetch_add(1, Ordering::Relaxed);
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            });
        }
    })
    .unwrap();

    assert_eq!(total.load(Ordering::Relaxed), THREADS * ITERATIONS);
    assert!(!lock.is_held_by_current_thread());
}

#[test]
fn test_exclusive_double_acquire_is_fatal() {
    let lock = ExclusiveLock::create("scenario.double", 0x100);
    lock.acquire();

    let report = catch_fatal(|| lock.acquire()).unwrap_err();
    assert!(report.message.contains("acquire on an acquired exclusive lock"));
    let dump = report.dump.expect("fatal report carries the lock dump");
    assert_eq!(dump.name, "scenario.double");
    assert_eq!(dump.kind, LockKind::Exclusive);

    // The first acquisition is untouched by the failed second one
    assert!(lock.is_held_by_current_thread());
    lock.release();
    assert!(!any_locks_held());
}

// =============================================================================
// RECURSION
// =============================================================================

#[test]
fn test_recursive_lock_depth_bound() {
    let lock = RecursiveLock::create("scenario.recursive", 0x200);
    for _ in 0..MAX_REC_DEPTH {
        lock.acquire();
    }
    assert_eq!(lock.count(), MAX_REC_DEPTH);

    let report = catch_fatal(|| lock.acquire()).unwrap_err();
    assert!(report.message.contains("maximum recursion depth"));

    // Another thread cannot get in until every level is released
    let lock2 = lock.clone();
    let blocked = thread::spawn(move || lock2.try_acquire()).join().unwrap();
    assert!(!blocked);

    for _ in 0..MAX_REC_DEPTH {
        lock.release();
    }
    let lock2 = lock.clone();
    let acquired = thread::spawn(move || {
        let ok = lock2.try_acquire();
        if ok {
            lock2.release();
        }
        ok
    })
    .join()
    .unwrap();
    assert!(acquired);
}

// =============================================================================
// READ-WRITE
// =============================================================================

#[test]
fn test_readers_share_writer_excludes() {
    let lock = ReadWriteLock::create_with_backend("scenario.rw", 0x300, true);
    let readers_in = Arc::new(AtomicU32::new(0));
    let release_readers = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let (lock, readers_in, release) = (lock.clone(), readers_in.clone(), release_readers.clone());
            thread::spawn(move || {
                lock.acquire_for_read();
                readers_in.fetch_add(1, Ordering::SeqCst);
                while !release.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(1));
                }
                assert!(lock.is_held_by_current_thread(RwQuery::Read));
                lock.release();
            })
        })
        .collect();

    while readers_in.load(Ordering::SeqCst) < 3 {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(lock.holder_count(), 3);
    assert!(!lock.try_acquire_for_write());
    assert!(lock.try_acquire_for_read());
    lock.release();

    release_readers.store(true, Ordering::SeqCst);
    for reader in readers {
        reader.join().unwrap();
    }

    lock.acquire_for_write();
    assert!(lock.is_held_by_current_thread(RwQuery::Write));
    assert!(!lock.is_held_by_current_thread(RwQuery::Read));
    let lock2 = lock.clone();
    assert!(!thread::spawn(move || lock2.try_acquire_for_read()).join().unwrap());
    lock.release();
    assert_eq!(lock.holder_count(), 0);
}

#[test]
fn test_rw_reacquire_from_holder_is_fatal() {
    let lock = ReadWriteLock::create("scenario.rw.reacquire", 0x300);
    lock.acquire_for_read();
    let report = catch_fatal(|| lock.acquire_for_write()).unwrap_err();
    assert!(report.message.contains("read-held read-write lock"));
    lock.release();
    assert!(!lock.is_held_by_current_thread(RwQuery::Any));
}

// =============================================================================
// RANK ORDER
// =============================================================================

#[test]
fn test_rank_order_is_enforced_per_thread() {
    let low = ExclusiveLock::create("scenario.rank.low", 0x10);
    let high = ExclusiveLock::create("scenario.rank.high", 0x20);

    crossbeam_thread::scope(|s| {
        s.spawn(|_| {
            low.acquire();
            high.acquire();
            assert_eq!(held_locks().len(), 2);
            high.release();
            low.release();
        })
        .join()
        .unwrap();

        s.spawn(|_| {
            high.acquire();
            let report = catch_fatal(|| low.acquire()).unwrap_err();
            assert!(report.message.contains("lock rank violation"));
            assert!(report.message.contains("scenario.rank.low"));
            assert!(report.message.contains("scenario.rank.high"));
            assert!(!low.is_held_by_current_thread());
            high.release();
            assert!(!any_locks_held());
        })
        .join()
        .unwrap();
    })
    .unwrap();
}

#[test]
fn test_rank_lock_marks_position() {
    let marker = RankLock::create("scenario.rank.marker", 0x50);
    let inner = Semaphore::create("scenario.rank.sem", 0x40);

    marker.acquire();
    let report = catch_fatal(|| inner.timed_down(Duration::from_millis(1))).unwrap_err();
    assert!(report.message.contains("lock rank violation"));
    marker.release();

    inner.up();
    assert!(inner.timed_down(Duration::from_millis(10)));
}

// =============================================================================
// SEMAPHORES, CONDITION VARIABLES, BARRIERS
// =============================================================================

#[test]
fn test_semaphore_ups_balance_downs() {
    const PRODUCERS: usize = 4;
    const ITEMS: usize = 250;

    let sem = Semaphore::create("scenario.sem", 0x400);
    let consumed = AtomicUsize::new(0);

    crossbeam_thread::scope(|s| {
        for _ in 0..PRODUCERS {
            s.spawn(|_| {
                for _ in 0..ITEMS {
                    sem.up();
                }
            });
        }
        for _ in 0..PRODUCERS {
            s.spawn(|_| {
                for _ in 0..ITEMS {
                    sem.down();
                    consumed.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    })
    .unwrap();

    assert_eq!(consumed.load(Ordering::Relaxed), PRODUCERS * ITEMS);
    assert_eq!(sem.count(), 0);
    assert!(!sem.try_down());
}

#[test]
fn test_condvar_producer_consumer() {
    let lock = ExclusiveLock::create("scenario.cv.lock", 0x500);
    let cv = lock.create_cond_var("scenario.cv");
    let ready = Arc::new(AtomicBool::new(false));

    let consumer = {
        let (lock, cv, ready) = (lock.clone(), cv.clone(), ready.clone());
        thread::spawn(move || {
            lock.acquire();
            while !ready.load(Ordering::SeqCst) {
                cv.wait(&*lock);
            }
            assert!(lock.is_held_by_current_thread());
            lock.release();
        })
    };

    thread::sleep(Duration::from_millis(10));
    lock.acquire();
    ready.store(true, Ordering::SeqCst);
    cv.signal();
    lock.release();

    consumer.join().unwrap();
    assert_eq!(cv.waiters(), 0);
    cv.destroy();
}

#[test]
fn test_barrier_phases_stay_in_step() {
    const THREADS: u32 = 5;
    const ROUNDS: u32 = 20;

    let barrier = Barrier::create("scenario.barrier", 0x600, THREADS);
    let arrivals = AtomicU32::new(0);

    crossbeam_thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|_| {
                for round in 1..=ROUNDS {
                    arrivals.fetch_add(1, Ordering::SeqCst);
                    barrier.enter();
                    // Nobody leaves a round before everybody arrived
                    assert!(arrivals.load(Ordering::SeqCst) >= round * THREADS);
                    barrier.enter();
                }
            });
        }
    })
    .unwrap();

    assert_eq!(arrivals.load(Ordering::SeqCst), THREADS * ROUNDS);
    barrier.destroy();
}

// =============================================================================
// SINGLETONS AND HOOKS
// =============================================================================

#[test]
fn test_singleton_creation_race() {
    static CELL: SingletonCell<ExclusiveLock> = SingletonCell::new();
    const THREADS: usize = 16;

    let serials: Vec<u64> = (0..THREADS)
        .map(|_| thread::spawn(|| ExclusiveLock::create_singleton(&CELL, "scenario.singleton", 0x700).serial()))
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect();

    assert!(serials.iter().all(|s| *s == serials[0]));
    let live = list_locks()
        .into_iter()
        .filter(|d| d.name == "scenario.singleton")
        .count();
    assert_eq!(live, 1);
}

fn fail_hooked(name: &str) -> bool {
    name.starts_with("scenario.hooked")
}

#[test]
fn test_try_acquire_failure_hook() {
    let hooked = ExclusiveLock::create("scenario.hooked.lock", 0x800);
    let hooked_sem = Semaphore::create("scenario.hooked.sem", 0x800);
    let plain = ExclusiveLock::create("scenario.plain.lock", 0x800);
    hooked_sem.up();

    set_try_acquire_failure_hook(Some(fail_hooked));
    assert!(!hooked.try_acquire());
    assert!(!hooked_sem.try_down());
    assert!(plain.try_acquire());
    plain.release();
    set_try_acquire_failure_hook(None);

    assert!(hooked.try_acquire());
    hooked.release();
    assert!(hooked_sem.try_down());
}
