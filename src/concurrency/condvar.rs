//! Condition variables bound to one lock

use super::header::{LockDump, LockHeader, LockKind, LockObject, Rank};
use crate::fatal::fatal;
use crate::thread::NativeCondvar;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Locks a [`ConditionVariable`] can wait with
pub trait CondVarLock: LockObject {
    /// Release the whole recursion, wait on `cv`, and take the lock back
    ///
    /// Returns false if `timeout` elapsed. Dies if the caller does not hold
    /// the lock.
    #[doc(hidden)]
    fn cond_wait(&self, cv: &NativeCondvar, timeout: Option<Duration>) -> bool;
}

struct WaitRef<'a>(&'a AtomicU32);

impl<'a> WaitRef<'a> {
    fn enter(count: &'a AtomicU32) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        WaitRef(count)
    }
}

impl Drop for WaitRef<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A condition variable created against exactly one lock
///
/// Waiting with any other lock is a fatal misuse. Wakeups may be spurious;
/// callers re-check their predicate in a loop.
pub struct ConditionVariable {
    signature: AtomicU32,
    name: String,
    owner_serial: u64,
    owner_name: Arc<str>,
    owner_rank: Rank,
    cv: NativeCondvar,
    ref_count: AtomicU32,
}

impl ConditionVariable {
    pub(crate) fn create(owner: &LockHeader, name: &str) -> Arc<Self> {
        Arc::new(Self {
            signature: AtomicU32::new(LockKind::ConditionVariable.signature()),
            name: name.to_string(),
            owner_serial: owner.serial(),
            owner_name: owner.shared_name(),
            owner_rank: owner.rank(),
            cv: NativeCondvar::new(),
            ref_count: AtomicU32::new(0),
        })
    }

    /// Name given at creation
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of threads currently inside a wait
    pub fn waiters(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    fn dump(&self) -> LockDump {
        LockDump {
            kind: LockKind::ConditionVariable,
            name: self.name.clone(),
            rank: self.owner_rank,
            serial: self.owner_serial,
            signature: self.signature.load(Ordering::Acquire),
            state: format!("lock={} waiters={}", self.owner_name, self.waiters()),
        }
    }

    #[track_caller]
    fn die(&self, message: &str) -> ! {
        fatal(Some(self.dump()), format!("{}: {}", message, self.name))
    }

    fn validate(&self) {
        if self.signature.load(Ordering::Acquire) != LockKind::ConditionVariable.signature() {
            self.die("use of a destroyed condition variable");
        }
    }

    fn wait_internal<L: CondVarLock + ?Sized>(&self, lock: &L, timeout: Option<Duration>) -> bool {
        self.validate();
        if lock.header().serial() != self.owner_serial {
            self.die("condition variable used with the wrong lock");
        }

        let _waiting = WaitRef::enter(&self.ref_count);
        lock.cond_wait(&self.cv, timeout)
    }

    /// Wait for a signal; the caller must hold the bound lock
    pub fn wait<L: CondVarLock + ?Sized>(&self, lock: &L) {
        self.wait_internal(lock, None);
    }

    /// Wait for at most `timeout`; returns false if it elapsed
    pub fn timed_wait<L: CondVarLock + ?Sized>(&self, lock: &L, timeout: Duration) -> bool {
        self.wait_internal(lock, Some(timeout))
    }

    /// Wake one waiter
    pub fn signal(&self) {
        self.validate();
        self.cv.signal();
    }

    /// Wake every waiter
    pub fn broadcast(&self) {
        self.validate();
        self.cv.broadcast();
    }

    /// Destroy the condition variable; nobody may be waiting on it
    pub fn destroy(self: Arc<Self>) {
        self.validate();
        if self.waiters() != 0 {
            self.die("destroy of a condition variable with waiters");
        }
        self.signature.store(0, Ordering::Release);
    }
}
