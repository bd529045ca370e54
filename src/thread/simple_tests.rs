//! Cross-module smoke tests for the native layer

use super::*;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

#[test]
fn test_platform_sync_compilation() {
    let _ = std::marker::PhantomData::<DefaultPlatformSync>;
}

#[test]
fn test_thread_keys_are_distinct() {
    let main_key = current_thread_key();
    assert_eq!(main_key, current_thread_key());

    let keys: Vec<ThreadKey> = (0..4)
        .map(|_| thread::spawn(current_thread_key))
        .map(|h| h.join().unwrap())
        .collect();
    // Threads joined one at a time may reuse keys, but never collide with a
    // thread that is still alive.
    assert!(keys.iter().all(|k| *k != main_key));
}

#[test]
fn test_thread_keys_unique_while_alive() {
    let barrier = Arc::new(std::sync::Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let key = current_thread_key();
                barrier.wait();
                key
            })
        })
        .collect();
    let keys: HashSet<ThreadKey> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(keys.len(), 4);
}

#[test]
fn test_native_mutex_contention() {
    let mutex = Arc::new(NativeMutex::new());
    let counter = Arc::new(AtomicU32::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let mutex = Arc::clone(&mutex);
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..200 {
                    mutex.lock();
                    let old = counter.load(Ordering::Relaxed);
                    thread::yield_now();
                    counter.store(old + 1, Ordering::Relaxed);
                    unsafe { mutex.unlock() };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(counter.load(Ordering::Relaxed), 1600);
}
