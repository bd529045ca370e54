//! Raw native primitives
//!
//! Thin, unchecked building blocks. None of these know about owners, ranks or
//! statistics; the MXUser layer above adds all of that.

use super::{DefaultPlatformSync, FutexWait, PlatformSync};
use crate::fatal::fatal;
use lock_api::{RawMutex as _, RawRwLock as _};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Plain non-recursive mutex without a guard
pub struct NativeMutex {
    raw: parking_lot::RawMutex,
}

impl NativeMutex {
    /// Create an unlocked mutex
    pub const fn new() -> Self {
        Self {
            raw: <parking_lot::RawMutex as lock_api::RawMutex>::INIT,
        }
    }

    /// Block until the mutex is acquired
    #[inline]
    pub fn lock(&self) {
        self.raw.lock();
    }

    /// Acquire the mutex if it is free
    #[inline]
    pub fn try_lock(&self) -> bool {
        self.raw.try_lock()
    }

    /// Release the mutex
    ///
    /// # Safety
    ///
    /// The mutex must be locked, and the lock must have been taken on the
    /// current thread (or logically handed to it).
    #[inline]
    pub unsafe fn unlock(&self) {
        unsafe { self.raw.unlock() }
    }

    /// Whether anyone currently holds the mutex
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }
}

impl Default for NativeMutex {
    fn default() -> Self {
        Self::new()
    }
}

/// Reader-writer lock without guards
pub struct NativeRwLock {
    raw: parking_lot::RawRwLock,
}

impl NativeRwLock {
    /// Create an unlocked reader-writer lock
    pub const fn new() -> Self {
        Self {
            raw: <parking_lot::RawRwLock as lock_api::RawRwLock>::INIT,
        }
    }

    /// Block until shared access is granted
    #[inline]
    pub fn lock_shared(&self) {
        self.raw.lock_shared();
    }

    /// Acquire shared access if no writer holds the lock
    #[inline]
    pub fn try_lock_shared(&self) -> bool {
        self.raw.try_lock_shared()
    }

    /// Release shared access
    ///
    /// # Safety
    ///
    /// The calling thread must hold shared access.
    #[inline]
    pub unsafe fn unlock_shared(&self) {
        unsafe { self.raw.unlock_shared() }
    }

    /// Block until exclusive access is granted
    #[inline]
    pub fn lock_exclusive(&self) {
        self.raw.lock_exclusive();
    }

    /// Acquire exclusive access if the lock is free
    #[inline]
    pub fn try_lock_exclusive(&self) -> bool {
        self.raw.try_lock_exclusive()
    }

    /// Release exclusive access
    ///
    /// # Safety
    ///
    /// The calling thread must hold exclusive access.
    #[inline]
    pub unsafe fn unlock_exclusive(&self) {
        unsafe { self.raw.unlock_exclusive() }
    }

    /// Whether anyone holds the lock in either mode
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }
}

impl Default for NativeRwLock {
    fn default() -> Self {
        Self::new()
    }
}

fn wait_on<S: PlatformSync>(word: &AtomicU32, val: u32, timeout: Option<Duration>) -> FutexWait {
    match S::futex_wait(word, val, timeout) {
        Ok(outcome) => outcome,
        Err(e) => fatal(None, format!("native wait failed: {}", e)),
    }
}

fn wake_on<S: PlatformSync>(word: &AtomicU32, count: u32) {
    if let Err(e) = S::futex_wake(word, count) {
        fatal(None, format!("native wake failed: {}", e));
    }
}

/// Condition variable usable with a [`NativeMutex`]
///
/// Sequence-counter design: a waiter samples the counter before dropping the
/// mutex, so a signal sent after the mutex is released always changes the
/// value the waiter sleeps on.
pub struct NativeCondvar<S: PlatformSync = DefaultPlatformSync> {
    seq: AtomicU32,
    _sync: PhantomData<fn() -> S>,
}

impl<S: PlatformSync> NativeCondvar<S> {
    /// Create a condition variable with no waiters
    pub const fn new() -> Self {
        Self {
            seq: AtomicU32::new(0),
            _sync: PhantomData,
        }
    }

    /// Release `mutex`, wait for a signal, and reacquire `mutex`
    ///
    /// Returns `false` only if `timeout` elapsed. Spurious wakeups return
    /// `true`; callers re-check their predicate. Signal interruptions are
    /// retried with the remaining budget.
    ///
    /// # Safety
    ///
    /// The calling thread must hold `mutex`.
    pub unsafe fn wait(&self, mutex: &NativeMutex, timeout: Option<Duration>) -> bool {
        let seq = self.seq.load(Ordering::Acquire);
        let deadline = timeout.map(|t| Instant::now() + t);

        unsafe { mutex.unlock() };

        let signalled = loop {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            if remaining == Some(Duration::ZERO) {
                break false;
            }
            match wait_on::<S>(&self.seq, seq, remaining) {
                FutexWait::Interrupted => continue,
                FutexWait::TimedOut => break false,
                FutexWait::Woken | FutexWait::ValueChanged => break true,
            }
        };

        mutex.lock();
        signalled
    }

    /// Wake one waiter
    pub fn signal(&self) {
        self.seq.fetch_add(1, Ordering::Release);
        wake_on::<S>(&self.seq, 1);
    }

    /// Wake every waiter
    pub fn broadcast(&self) {
        self.seq.fetch_add(1, Ordering::Release);
        wake_on::<S>(&self.seq, u32::MAX);
    }
}

impl<S: PlatformSync> Default for NativeCondvar<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Counting semaphore starting at zero
pub struct NativeSemaphore<S: PlatformSync = DefaultPlatformSync> {
    count: AtomicU32,
    waiters: AtomicU32,
    _sync: PhantomData<fn() -> S>,
}

impl<S: PlatformSync> NativeSemaphore<S> {
    /// Create a semaphore with a count of zero
    pub const fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
            waiters: AtomicU32::new(0),
            _sync: PhantomData,
        }
    }

    /// Current count (racy snapshot)
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    /// Decrement if the count is positive
    pub fn try_down(&self) -> bool {
        let mut current = self.count.load(Ordering::Relaxed);
        while current > 0 {
            match self.count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    /// Block until the count can be decremented
    pub fn down(&self) {
        while !self.try_down() {
            self.sleep(None);
        }
    }

    /// Decrement, waiting at most `timeout`
    ///
    /// The whole budget is consumed before giving up; interruptions and
    /// lost races against other waiters just loop.
    pub fn timed_down(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_down() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.sleep(Some(remaining));
        }
    }

    fn sleep(&self, timeout: Option<Duration>) {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        if self.count.load(Ordering::SeqCst) == 0 {
            wait_on::<S>(&self.count, 0, timeout);
        }
        self.waiters.fetch_sub(1, Ordering::SeqCst);
    }

    /// Increment and wake one waiter
    pub fn up(&self) {
        let previous = self.count.fetch_add(1, Ordering::SeqCst);
        if previous == u32::MAX {
            fatal(None, "semaphore count overflow");
        }
        if self.waiters.load(Ordering::SeqCst) > 0 {
            wake_on::<S>(&self.count, 1);
        }
    }
}

impl<S: PlatformSync> Default for NativeSemaphore<S> {
    fn default() -> Self {
        Self::new()
    }
}
