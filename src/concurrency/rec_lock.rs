//! Reentrant lock core
//!
//! A native mutex plus an owner and a recursion count. Every MXUser lock that
//! needs mutual exclusion (and the registry itself) sits on one of these. The
//! core does no tracking and no statistics; it reports misuse back to its
//! caller, which knows how to describe the lock it belongs to.

use super::header::MAX_REC_DEPTH;
use crate::statistics::{elapsed_ns, now_ns};
use crate::thread::{current_thread_key, NativeCondvar, NativeMutex};
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

const NO_OWNER: usize = 0;

/// Misuse detected by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CoreMisuse {
    NotHeld,
    NotOwner,
    DepthExceeded,
}

impl fmt::Display for CoreMisuse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CoreMisuse::NotHeld => "release of an unacquired lock",
            CoreMisuse::NotOwner => "non-owner release of a lock",
            CoreMisuse::DepthExceeded => "maximum recursion depth exceeded on a lock",
        })
    }
}

/// Result of a blocking acquisition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct AcquireOutcome {
    /// The native mutex was not immediately available
    pub contended: bool,
    /// Time spent blocked, when measured
    pub wait_ns: u64,
}

pub(crate) struct RecLockCore {
    mutex: NativeMutex,
    count: AtomicU32,
    owner: AtomicUsize,
}

impl RecLockCore {
    pub const fn new() -> Self {
        Self {
            mutex: NativeMutex::new(),
            count: AtomicU32::new(0),
            owner: AtomicUsize::new(NO_OWNER),
        }
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    pub fn owner(&self) -> usize {
        self.owner.load(Ordering::Acquire)
    }

    /// True if the calling thread holds the core
    #[inline]
    pub fn is_owner(&self) -> bool {
        self.count() > 0 && self.owner.load(Ordering::Acquire) == current_thread_key().get()
    }

    fn bump(&self) -> Result<(), CoreMisuse> {
        let count = self.count.load(Ordering::Relaxed);
        if count >= MAX_REC_DEPTH {
            return Err(CoreMisuse::DepthExceeded);
        }
        self.count.store(count + 1, Ordering::Release);
        Ok(())
    }

    fn take_ownership(&self) {
        self.owner.store(current_thread_key().get(), Ordering::Release);
        self.count.store(1, Ordering::Release);
    }

    /// Acquire, re-entering if the caller already owns the core
    ///
    /// With `measure`, a non-blocking attempt is made first so the outcome
    /// tells whether the caller had to wait and for how long.
    pub fn acquire(&self, measure: bool) -> Result<AcquireOutcome, CoreMisuse> {
        if self.is_owner() {
            self.bump()?;
            return Ok(AcquireOutcome::default());
        }

        let outcome = if measure {
            if self.mutex.try_lock() {
                AcquireOutcome::default()
            } else {
                let start = now_ns();
                self.mutex.lock();
                AcquireOutcome {
                    contended: true,
                    wait_ns: elapsed_ns(start),
                }
            }
        } else {
            self.mutex.lock();
            AcquireOutcome::default()
        };

        self.take_ownership();
        Ok(outcome)
    }

    /// Acquire without blocking
    pub fn try_acquire(&self) -> Result<bool, CoreMisuse> {
        if self.is_owner() {
            self.bump()?;
            return Ok(true);
        }
        if !self.mutex.try_lock() {
            return Ok(false);
        }
        self.take_ownership();
        Ok(true)
    }

    /// Drop one level of ownership; returns the remaining count
    pub fn release(&self) -> Result<u32, CoreMisuse> {
        let count = self.count();
        if count == 0 {
            return Err(CoreMisuse::NotHeld);
        }
        if self.owner.load(Ordering::Acquire) != current_thread_key().get() {
            return Err(CoreMisuse::NotOwner);
        }

        let remaining = count - 1;
        if remaining == 0 {
            self.owner.store(NO_OWNER, Ordering::Release);
            self.count.store(0, Ordering::Release);
            // SAFETY: the calling thread owns the mutex, checked above
            unsafe { self.mutex.unlock() };
        } else {
            self.count.store(remaining, Ordering::Release);
        }
        Ok(remaining)
    }

    /// Wait on `cv`, giving up the whole recursion while blocked
    ///
    /// Returns false if `timeout` elapsed. On return the caller holds the
    /// core at its previous depth again.
    pub fn wait(&self, cv: &NativeCondvar, timeout: Option<Duration>) -> Result<bool, CoreMisuse> {
        if !self.is_owner() {
            return Err(if self.count() == 0 {
                CoreMisuse::NotHeld
            } else {
                CoreMisuse::NotOwner
            });
        }

        let saved = self.count.load(Ordering::Relaxed);
        self.owner.store(NO_OWNER, Ordering::Release);
        self.count.store(0, Ordering::Release);

        // SAFETY: the calling thread owns the mutex, checked above
        let signalled = unsafe { cv.wait(&self.mutex, timeout) };

        self.owner.store(current_thread_key().get(), Ordering::Release);
        self.count.store(saved, Ordering::Release);
        Ok(signalled)
    }
}

impl Default for RecLockCore {
    fn default() -> Self {
        Self::new()
    }
}
