//! Exclusive (non-recursive) lock

use super::condvar::{CondVarLock, ConditionVariable};
use super::header::{LockDump, LockHeader, LockKind, LockObject, Rank};
use super::rank::{ensure_capacity, is_tracked, track_acquire, track_release};
use super::rec_lock::RecLockCore;
use super::registry::{register, unregister, SingletonCell};
use super::try_acquire_should_fail;
use crate::statistics::{elapsed_ns, now_ns, LockStats};
use crate::thread::NativeCondvar;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A mutex that may be held by one thread once
///
/// Acquiring it again from the owning thread is a fatal misuse, not a
/// deadlock.
pub struct ExclusiveLock {
    header: LockHeader,
    core: RecLockCore,
    stats: LockStats,
    hold_start: AtomicU64,
}

impl ExclusiveLock {
    /// Create and register an exclusive lock
    pub fn create(name: &str, rank: Rank) -> Arc<Self> {
        let lock = Arc::new(Self {
            header: LockHeader::new(LockKind::Exclusive, name, rank),
            core: RecLockCore::new(),
            stats: LockStats::new(),
            hold_start: AtomicU64::new(0),
        });
        register(&lock);
        lock
    }

    /// The lock stored in `cell`, created on first use
    pub fn create_singleton(cell: &SingletonCell<ExclusiveLock>, name: &str, rank: Rank) -> Arc<Self> {
        cell.get_or_init(|| Self::create(name, rank))
    }

    /// Name given at creation
    pub fn name(&self) -> &str {
        self.header.name()
    }

    /// Rank checked on blocking acquires
    pub fn rank(&self) -> Rank {
        self.header.rank()
    }

    /// Registry serial number
    pub fn serial(&self) -> u64 {
        self.header.serial()
    }

    /// Block until the lock is held by the calling thread
    pub fn acquire(&self) {
        self.header.validate(LockKind::Exclusive);
        if self.core.is_owner() {
            self.die("acquire on an acquired exclusive lock");
        }

        track_acquire(&self.header, true);

        let measure = self.stats.measure_acquisition();
        let outcome = self
            .core
            .acquire(measure)
            .unwrap_or_else(|misuse| self.die(&misuse.to_string()));
        if self.core.count() > 1 {
            self.die("acquire on an acquired exclusive lock");
        }

        if measure {
            self.stats.record_acquisition(true, outcome.contended, outcome.wait_ns);
        }
        if self.stats.track_held() {
            self.hold_start.store(now_ns(), Ordering::Relaxed);
        }
    }

    /// Take the lock if it is free; never blocks
    ///
    /// No rank check is made on this path.
    pub fn try_acquire(&self) -> bool {
        self.header.validate(LockKind::Exclusive);
        if try_acquire_should_fail(self.header.name()) {
            return false;
        }
        if self.core.is_owner() {
            self.die("try-acquire on an acquired exclusive lock");
        }
        ensure_capacity(&self.header);

        let acquired = self
            .core
            .try_acquire()
            .unwrap_or_else(|misuse| self.die(&misuse.to_string()));

        if self.stats.measure_acquisition() {
            self.stats.record_acquisition(acquired, false, 0);
        }
        if acquired {
            track_acquire(&self.header, false);
            if self.stats.track_held() {
                self.hold_start.store(now_ns(), Ordering::Relaxed);
            }
        }
        acquired
    }

    /// Release the lock; the caller must hold it
    pub fn release(&self) {
        self.header.validate(LockKind::Exclusive);
        if !self.core.is_owner() {
            let message = if self.core.count() == 0 {
                "release of an unacquired exclusive lock"
            } else {
                "non-owner release of an exclusive lock"
            };
            self.die(message);
        }

        if self.stats.track_held() {
            self.stats
                .record_held(elapsed_ns(self.hold_start.load(Ordering::Relaxed)));
        }

        track_release(&self.header);
        self.core
            .release()
            .unwrap_or_else(|misuse| self.die(&misuse.to_string()));
    }

    /// Whether the calling thread holds the lock
    pub fn is_held_by_current_thread(&self) -> bool {
        self.header.validate(LockKind::Exclusive);
        self.core.is_owner()
    }

    /// Acquire and return a guard that releases on drop
    pub fn lock(&self) -> ExclusiveGuard<'_> {
        self.acquire();
        ExclusiveGuard { lock: self }
    }

    /// Create a condition variable bound to this lock
    pub fn create_cond_var(self: &Arc<Self>, name: &str) -> Arc<ConditionVariable> {
        self.header.validate(LockKind::Exclusive);
        ConditionVariable::create(&self.header, name)
    }

    /// Start collecting statistics, optionally including held times
    pub fn enable_stats(&self, track_held: bool) {
        self.header.validate(LockKind::Exclusive);
        self.stats.enable(track_held);
    }

    /// Stop collecting statistics
    pub fn disable_stats(&self) {
        self.header.validate(LockKind::Exclusive);
        self.stats.disable();
    }

    /// Statistics collected for this lock
    pub fn stats(&self) -> &LockStats {
        &self.stats
    }

    /// Destroy the lock; it must not be held
    pub fn destroy(self: Arc<Self>) {
        self.header.validate(LockKind::Exclusive);
        if self.core.count() > 0 {
            self.die("destroy of an acquired exclusive lock");
        }
        self.header.mark_destroyed();
        unregister(self.header.serial());
    }
}

impl LockObject for ExclusiveLock {
    fn header(&self) -> &LockHeader {
        &self.header
    }

    fn dump(&self) -> LockDump {
        self.header.dump(format!(
            "count={} owner={:#x}",
            self.core.count(),
            self.core.owner()
        ))
    }

    fn report_stats(&self) {
        self.stats.report(self.header.name(), self.header.serial());
    }
}

impl CondVarLock for ExclusiveLock {
    fn cond_wait(&self, cv: &NativeCondvar, timeout: Option<Duration>) -> bool {
        self.header.validate(LockKind::Exclusive);
        if !self.core.is_owner() {
            self.die("condition variable wait without holding the exclusive lock");
        }
        self.core
            .wait(cv, timeout)
            .unwrap_or_else(|misuse| self.die(&misuse.to_string()))
    }
}

impl Drop for ExclusiveLock {
    fn drop(&mut self) {
        unregister(self.header.serial());
        if self.core.count() > 0 && !std::thread::panicking() {
            if is_tracked(&self.header) {
                track_release(&self.header);
            }
            self.die("drop of an acquired exclusive lock");
        }
    }
}

/// Holds an [`ExclusiveLock`] until dropped
#[must_use = "the lock is released when the guard is dropped"]
pub struct ExclusiveGuard<'a> {
    lock: &'a ExclusiveLock,
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
