//! Process-wide list of live primitives and the singleton cell
//!
//! Every primitive registers itself at construction and leaves at destroy (or
//! drop). The registry lives in a [`SingletonCell`], the same lazy
//! compare-and-swap cell clients use to create primitives on first use, and
//! is guarded by a plain reentrant core so registry traffic never shows up in
//! rank tracking or statistics.

use super::header::{LockDump, LockObject};
use super::rec_lock::RecLockCore;
use crate::mx_verify;
use crate::statistics::report::with_stats_line;
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Storage cell that ends up holding exactly one `T`
///
/// The first caller of [`get_or_init`](Self::get_or_init) builds a value and
/// tries to install it with a single compare-and-swap. Racing callers may
/// build extra values; the losers' values are dropped and every caller gets
/// the winner.
pub struct SingletonCell<T> {
    ptr: AtomicPtr<T>,
    _owns: PhantomData<Arc<T>>,
}

impl<T> SingletonCell<T> {
    /// An empty cell, usable in a `static`
    pub const fn new() -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
            _owns: PhantomData,
        }
    }

    /// The installed value, if any
    pub fn get(&self) -> Option<Arc<T>> {
        let current = self.ptr.load(Ordering::Acquire);
        if current.is_null() {
            return None;
        }
        // SAFETY: a non-null pointer came from Arc::into_raw in get_or_init and
        // the cell keeps that strong reference until it is dropped.
        unsafe {
            Arc::increment_strong_count(current);
            Some(Arc::from_raw(current))
        }
    }

    /// The installed value, building and installing one if the cell is empty
    pub fn get_or_init<F>(&self, init: F) -> Arc<T>
    where
        F: FnOnce() -> Arc<T>,
    {
        if let Some(existing) = self.get() {
            return existing;
        }

        let candidate = Arc::into_raw(init()) as *mut T;
        match self
            .ptr
            .compare_exchange(ptr::null_mut(), candidate, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                // SAFETY: candidate is now owned by the cell; take a second reference for the caller
                unsafe {
                    Arc::increment_strong_count(candidate);
                    Arc::from_raw(candidate)
                }
            }
            Err(winner) => {
                // SAFETY: candidate came from Arc::into_raw above and was never shared
                drop(unsafe { Arc::from_raw(candidate) });
                // SAFETY: winner is the cell's installed pointer, see get()
                unsafe {
                    Arc::increment_strong_count(winner);
                    Arc::from_raw(winner)
                }
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        !self.ptr.load(Ordering::Acquire).is_null()
    }
}

impl<T> Default for SingletonCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for SingletonCell<T> {
    fn drop(&mut self) {
        let current = *self.ptr.get_mut();
        if !current.is_null() {
            // SAFETY: releases the cell's own strong reference
            drop(unsafe { Arc::from_raw(current) });
        }
    }
}

struct Entry {
    serial: u64,
    object: Weak<dyn LockObject>,
}

/// The live-primitive list
pub struct Registry {
    lock: RecLockCore,
    entries: UnsafeCell<Vec<Entry>>,
    last_announced: AtomicU64,
}

// SAFETY: `entries` is only touched while `lock` is held
unsafe impl Sync for Registry {}
unsafe impl Send for Registry {}

static REGISTRY: SingletonCell<Registry> = SingletonCell::new();

impl Registry {
    fn new() -> Self {
        log::debug!("MXUser: lock registry created");
        Self {
            lock: RecLockCore::new(),
            entries: UnsafeCell::new(Vec::new()),
            last_announced: AtomicU64::new(0),
        }
    }

    /// The process registry, created on first use
    pub fn global() -> Arc<Registry> {
        REGISTRY.get_or_init(|| Arc::new(Registry::new()))
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut Vec<Entry>) -> R) -> R {
        let acquired = self.lock.acquire(false);
        mx_verify!(acquired.is_ok(), "registry lock");
        // SAFETY: the registry lock is held; the core is reentrant, and
        // callers never run foreign code while holding the reference.
        let result = f(unsafe { &mut *self.entries.get() });
        let released = self.lock.release();
        mx_verify!(released.is_ok(), "registry unlock");
        result
    }

    fn add(&self, serial: u64, object: Weak<dyn LockObject>) {
        self.with_entries(|entries| entries.push(Entry { serial, object }));
    }

    fn remove(&self, serial: u64) -> bool {
        self.with_entries(|entries| match entries.iter().position(|e| e.serial == serial) {
            Some(index) => {
                entries.swap_remove(index);
                true
            }
            None => false,
        })
    }

    /// Live primitives, pruning entries whose objects are gone
    fn live(&self) -> Vec<Arc<dyn LockObject>> {
        self.with_entries(|entries| {
            entries.retain(|e| e.object.strong_count() > 0);
            entries.iter().filter_map(|e| e.object.upgrade()).collect()
        })
    }

    pub fn len(&self) -> usize {
        self.with_entries(|entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drain(&self) -> usize {
        self.with_entries(|entries| {
            let count = entries.len();
            entries.clear();
            count
        })
    }
}

/// Add a new primitive to the registry
pub(crate) fn register<T: LockObject + 'static>(object: &Arc<T>) {
    let serial = object.header().serial();
    let weak = Arc::downgrade(object);
    let weak: Weak<dyn LockObject> = weak;
    Registry::global().add(serial, weak);
}

/// Take a primitive out of the registry; a no-op if it already left
pub(crate) fn unregister(serial: u64) {
    if let Some(registry) = REGISTRY.get() {
        registry.remove(serial);
    }
}

/// Dumps of every live registered primitive
pub fn list_locks() -> Vec<LockDump> {
    let mut dumps: Vec<LockDump> = Registry::global().live().iter().map(|o| o.dump()).collect();
    dumps.sort_by_key(|d| d.serial);
    dumps
}

/// Periodic statistics pass
///
/// Announces primitives created since the previous epoch, then runs each live
/// primitive's statistics callback. Returns the number of primitives visited.
pub fn run_stats_epoch() -> usize {
    let registry = Registry::global();
    let mut objects = registry.live();
    objects.sort_by_key(|o| o.header().serial());

    let last = registry.last_announced.load(Ordering::Acquire);
    let newest = objects.iter().map(|o| o.header().serial()).max().unwrap_or(last);

    with_stats_line(|line| {
        for object in objects.iter().filter(|o| o.header().serial() > last) {
            let header = object.header();
            line.start("MXUser: n");
            line.push(&format!("n={}", header.name()));
            line.push(&format!("l={}", header.serial()));
            line.push(&format!("r=0x{:x}", header.rank()));
            line.finish();
        }
    });
    registry.last_announced.fetch_max(newest, Ordering::AcqRel);

    for object in &objects {
        object.report_stats();
    }
    objects.len()
}

/// Empty the registry, returning how many entries were dropped
///
/// Primitives stay usable; they are simply no longer visited by
/// [`run_stats_epoch`] or listed by [`list_locks`]. Primitives created
/// afterwards register as usual.
pub fn shutdown() -> usize {
    let dropped = REGISTRY.get().map(|r| r.drain()).unwrap_or(0);
    log::debug!("MXUser: registry shut down, {} entries dropped", dropped);
    dropped
}
