//! Recursive lock, owned or bound to a host mutex

use super::condvar::{CondVarLock, ConditionVariable};
use super::header::{LockDump, LockHeader, LockKind, LockObject, Rank};
use super::rank::{ensure_capacity, is_tracked, track_acquire, track_release};
use super::rec_lock::RecLockCore;
use super::registry::{register, unregister, SingletonCell};
use super::try_acquire_should_fail;
use crate::statistics::{elapsed_ns, now_ns, LockStats};
use crate::thread::NativeCondvar;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A mutex implemented by an embedding host
///
/// A [`RecursiveLock`] bound to one of these forwards every operation to it
/// and does no tracking or statistics of its own.
pub trait ExternalMutex: Send + Sync {
    fn lock(&self);
    fn unlock(&self);
    fn try_lock(&self) -> bool;
    fn is_locked_by_current_thread(&self) -> bool;
    fn name(&self) -> &str;
}

enum Backend {
    Owned(RecLockCore),
    Delegated(Arc<dyn ExternalMutex>),
}

/// A mutex the owning thread may re-acquire up to
/// [`MAX_REC_DEPTH`](super::MAX_REC_DEPTH) times
///
/// Recursive locks are reference counted: [`inc_ref`](Self::inc_ref) adds a
/// logical owner and [`dec_ref`](Self::dec_ref) (or
/// [`destroy`](Self::destroy)) drops one. The lock is torn down when the last
/// logical owner lets go.
pub struct RecursiveLock {
    header: LockHeader,
    backend: Backend,
    stats: LockStats,
    ref_count: AtomicU32,
    hold_start: AtomicU64,
}

impl RecursiveLock {
    fn build(header: LockHeader, backend: Backend, stats: LockStats) -> Arc<Self> {
        let lock = Arc::new(Self {
            header,
            backend,
            stats,
            ref_count: AtomicU32::new(1),
            hold_start: AtomicU64::new(0),
        });
        register(&lock);
        lock
    }

    /// Create and register a recursive lock
    pub fn create(name: &str, rank: Rank) -> Arc<Self> {
        Self::build(
            LockHeader::new(LockKind::Recursive, name, rank),
            Backend::Owned(RecLockCore::new()),
            LockStats::new(),
        )
    }

    /// The lock stored in `cell`, created on first use
    pub fn create_singleton(cell: &SingletonCell<RecursiveLock>, name: &str, rank: Rank) -> Arc<Self> {
        cell.get_or_init(|| Self::create(name, rank))
    }

    /// Wrap a host-owned mutex
    ///
    /// Destroying the wrapper leaves the host mutex alone.
    pub fn bind(external: Arc<dyn ExternalMutex>, rank: Rank) -> Arc<Self> {
        let name = external.name().to_string();
        Self::build(
            LockHeader::new(LockKind::Recursive, &name, rank),
            Backend::Delegated(external),
            LockStats::disabled(),
        )
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

    /// Whether this lock forwards to a host mutex
    pub fn is_bound(&self) -> bool {
        matches!(self.backend, Backend::Delegated(_))
    }

    /// Block until the calling thread holds the lock, re-entering if it
    /// already does
    pub fn acquire(&self) {
        self.header.validate(LockKind::Recursive);
        match &self.backend {
            Backend::Delegated(external) => external.lock(),
            Backend::Owned(core) => {
                let first = !core.is_owner();
                if first {
                    track_acquire(&self.header, true);
                }

                let measure = first && self.stats.measure_acquisition();
                let outcome = core
                    .acquire(measure)
                    .unwrap_or_else(|misuse| self.die(&misuse.to_string()));

                if measure {
                    self.stats.record_acquisition(true, outcome.contended, outcome.wait_ns);
                }
                if first && self.stats.track_held() {
                    self.hold_start.store(now_ns(), Ordering::Relaxed);
                }
            }
        }
    }

    /// Take or re-enter the lock if possible; never blocks and never checks rank
    pub fn try_acquire(&self) -> bool {
        self.header.validate(LockKind::Recursive);
        match &self.backend {
            Backend::Delegated(external) => external.try_lock(),
            Backend::Owned(core) => {
                if try_acquire_should_fail(self.header.name()) {
                    return false;
                }

                let first = !core.is_owner();
                if first {
                    ensure_capacity(&self.header);
                }
                let acquired = core
                    .try_acquire()
                    .unwrap_or_else(|misuse| self.die(&misuse.to_string()));

                if first {
                    if self.stats.measure_acquisition() {
                        self.stats.record_acquisition(acquired, false, 0);
                    }
                    if acquired {
                        track_acquire(&self.header, false);
                        if self.stats.track_held() {
                            self.hold_start.store(now_ns(), Ordering::Relaxed);
                        }
                    }
                }
                acquired
            }
        }
    }

    /// Drop one level of recursion; the caller must hold the lock
    pub fn release(&self) {
        self.header.validate(LockKind::Recursive);
        match &self.backend {
            Backend::Delegated(external) => external.unlock(),
            Backend::Owned(core) => {
                if !core.is_owner() {
                    let message = if core.count() == 0 {
                        "release of an unacquired recursive lock"
                    } else {
                        "non-owner release of a recursive lock"
                    };
                    self.die(message);
                }

                if core.count() == 1 {
                    if self.stats.track_held() {
                        self.stats
                            .record_held(elapsed_ns(self.hold_start.load(Ordering::Relaxed)));
                    }
                    track_release(&self.header);
                }
                core.release()
                    .unwrap_or_else(|misuse| self.die(&misuse.to_string()));
            }
        }
    }

    /// Whether the calling thread holds the lock
    pub fn is_held_by_current_thread(&self) -> bool {
        self.header.validate(LockKind::Recursive);
        match &self.backend {
            Backend::Delegated(external) => external.is_locked_by_current_thread(),
            Backend::Owned(core) => core.is_owner(),
        }
    }

    /// Recursion depth of the calling thread, zero if it does not hold the lock
    pub fn count(&self) -> u32 {
        self.header.validate(LockKind::Recursive);
        match &self.backend {
            Backend::Owned(core) if core.is_owner() => core.count(),
            _ => 0,
        }
    }

    /// Acquire and return a guard that releases on drop
    pub fn lock(&self) -> RecursiveGuard<'_> {
        self.acquire();
        RecursiveGuard { lock: self }
    }

    /// Create a condition variable bound to this lock
    pub fn create_cond_var(self: &Arc<Self>, name: &str) -> Arc<ConditionVariable> {
        self.header.validate(LockKind::Recursive);
        if self.is_bound() {
            self.die("condition variable on a bound recursive lock");
        }
        ConditionVariable::create(&self.header, name)
    }

    /// Start collecting statistics; ignored for bound locks
    pub fn enable_stats(&self, track_held: bool) {
        self.header.validate(LockKind::Recursive);
        if !self.is_bound() {
            self.stats.enable(track_held);
        }
    }

    /// Stop collecting statistics
    pub fn disable_stats(&self) {
        self.header.validate(LockKind::Recursive);
        self.stats.disable();
    }

    /// Statistics collected for this lock
    pub fn stats(&self) -> &LockStats {
        &self.stats
    }

    /// Add a logical owner
    pub fn inc_ref(&self) {
        self.header.validate(LockKind::Recursive);
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop a logical owner; the last one tears the lock down
    pub fn dec_ref(self: Arc<Self>) {
        self.header.validate(LockKind::Recursive);
        let previous = self.ref_count.fetch_sub(1, Ordering::AcqRel);
        crate::mx_verify!(previous > 0, "recursive lock reference count underflow");
        if previous == 1 {
            self.teardown();
        }
    }

    /// Number of logical owners
    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Acquire)
    }

    /// Same as [`dec_ref`](Self::dec_ref)
    pub fn destroy(self: Arc<Self>) {
        self.dec_ref();
    }

    fn teardown(&self) {
        if let Backend::Owned(core) = &self.backend {
            if core.count() > 0 {
                self.die("destroy of an acquired recursive lock");
            }
        }
        self.header.mark_destroyed();
        unregister(self.header.serial());
    }
}

impl LockObject for RecursiveLock {
    fn header(&self) -> &LockHeader {
        &self.header
    }

    fn dump(&self) -> LockDump {
        let state = match &self.backend {
            Backend::Owned(core) => format!(
                "count={} owner={:#x} refs={}",
                core.count(),
                core.owner(),
                self.ref_count()
            ),
            Backend::Delegated(external) => format!("bound to {} refs={}", external.name(), self.ref_count()),
        };
        self.header.dump(state)
    }

    fn report_stats(&self) {
        if !self.is_bound() {
            self.stats.report(self.header.name(), self.header.serial());
        }
    }
}

impl CondVarLock for RecursiveLock {
    fn cond_wait(&self, cv: &NativeCondvar, timeout: Option<Duration>) -> bool {
        self.header.validate(LockKind::Recursive);
        match &self.backend {
            Backend::Delegated(_) => self.die("condition variable wait on a bound recursive lock"),
            Backend::Owned(core) => {
                if !core.is_owner() {
                    self.die("condition variable wait without holding the recursive lock");
                }
                core.wait(cv, timeout)
                    .unwrap_or_else(|misuse| self.die(&misuse.to_string()))
            }
        }
    }
}

impl Drop for RecursiveLock {
    fn drop(&mut self) {
        unregister(self.header.serial());
        let held = matches!(&self.backend, Backend::Owned(core) if core.count() > 0);
        if held && !std::thread::panicking() {
            if is_tracked(&self.header) {
                track_release(&self.header);
            }
            self.die("drop of an acquired recursive lock");
        }
    }
}

/// Holds one level of a [`RecursiveLock`] until dropped
#[must_use = "the lock is released when the guard is dropped"]
pub struct RecursiveGuard<'a> {
    lock: &'a RecursiveLock,
}

impl Drop for RecursiveGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::header::MAX_REC_DEPTH;
    use crate::concurrency::rank::{any_locks_held, held_locks};
    use crate::fatal::catch_fatal;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_recursion_depth_and_tracking() {
        let lock = RecursiveLock::create("rec-depth", 5);
        for depth in 1..=MAX_REC_DEPTH {
            lock.acquire();
            assert_eq!(lock.count(), depth);
        }
        // Tracked once regardless of depth
        assert_eq!(held_locks().len(), 1);

        let report = catch_fatal(|| lock.acquire()).unwrap_err();
        assert!(report.message.contains("maximum recursion depth"));

        for _ in 0..MAX_REC_DEPTH - 1 {
            lock.release();
            assert!(lock.is_held_by_current_thread());
        }
        lock.release();
        assert!(!lock.is_held_by_current_thread());
        assert!(!any_locks_held());
    }

    #[test]
    fn test_native_free_only_at_zero() {
        let lock = RecursiveLock::create("rec-zero", 0);
        lock.acquire();
        lock.acquire();
        lock.release();

        let other = lock.clone();
        assert!(!thread::spawn(move || other.try_acquire()).join().unwrap());

        lock.release();
        let other = lock.clone();
        assert!(thread::spawn(move || {
            let got = other.try_acquire();
            other.release();
            got
        })
        .join()
        .unwrap());
    }

    #[test]
    fn test_reentry_skips_rank_check() {
        let low = RecursiveLock::create("rec-low", 1);
        let high = RecursiveLock::create("rec-high", 2);
        low.acquire();
        high.acquire();
        // Re-entering a lock already held is not a new acquisition
        low.acquire();
        low.release();
        high.release();
        low.release();
    }

    #[test]
    fn test_release_misuse() {
        let lock = RecursiveLock::create("rec-misuse", 0);
        let report = catch_fatal(|| lock.release()).unwrap_err();
        assert!(report.message.contains("release of an unacquired recursive lock"));

        lock.acquire();
        let other = lock.clone();
        let report = thread::spawn(move || catch_fatal(|| other.release()).unwrap_err())
            .join()
            .unwrap();
        assert!(report.message.contains("non-owner release"));
        lock.release();
    }

    #[test]
    fn test_reference_counting() {
        let lock = RecursiveLock::create("rec-refs", 0);
        lock.inc_ref();
        assert_eq!(lock.ref_count(), 2);

        let keep = lock.clone();
        lock.dec_ref();
        assert_eq!(keep.ref_count(), 1);
        keep.acquire();
        keep.release();

        let handle = keep.clone();
        keep.destroy();
        assert!(catch_fatal(|| handle.acquire()).is_err());
    }

    #[test]
    fn test_destroy_held_fatal() {
        let lock = RecursiveLock::create("rec-destroy-held", 0);
        lock.acquire();
        let report = catch_fatal(|| lock.clone().destroy()).unwrap_err();
        assert!(report.message.contains("destroy of an acquired recursive lock"));
        lock.release();
    }

    #[test]
    fn test_drop_while_held_fatal() {
        let lock = RecursiveLock::create("rec-drop-held", 0x10);
        lock.acquire();
        lock.acquire();
        let report = catch_fatal(move || drop(lock)).unwrap_err();
        assert!(report.message.contains("drop of an acquired recursive lock"));
        assert!(!any_locks_held());
    }

    #[test]
    fn test_try_acquire_with_full_tracker() {
        use crate::concurrency::{RankLock, MAX_LOCKS_PER_THREAD};

        let markers: Vec<_> = (0..MAX_LOCKS_PER_THREAD)
            .map(|i| RankLock::create(&format!("rec-fill-{}", i), 0))
            .collect();
        for marker in &markers {
            marker.acquire();
        }
        let lock = RecursiveLock::create("rec-try-full", 0);
        let report = catch_fatal(|| lock.try_acquire()).unwrap_err();
        assert!(report.message.contains("too many locks held"));
        assert_eq!(lock.count(), 0);
        for marker in &markers {
            marker.release();
        }

        assert!(lock.try_acquire());
        lock.release();
    }

    #[test]
    fn test_condvar_releases_full_depth() {
        let lock = RecursiveLock::create("rec-cv", 0);
        let cv = lock.create_cond_var("rec-cv");
        lock.acquire();
        lock.acquire();

        let other = lock.clone();
        let cv2 = cv.clone();
        let signaller = thread::spawn(move || {
            other.acquire();
            cv2.signal();
            other.release();
        });

        while !cv.timed_wait(&*lock, Duration::from_millis(50)) {}
        assert_eq!(lock.count(), 2);
        lock.release();
        lock.release();
        signaller.join().unwrap();
    }

    #[derive(Default)]
    struct HostMutex {
        core: RecLockCore,
        calls: AtomicUsize,
    }

    impl ExternalMutex for HostMutex {
        fn lock(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.core.acquire(false).unwrap();
        }
        fn unlock(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.core.release().unwrap();
        }
        fn try_lock(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.core.try_acquire().unwrap()
        }
        fn is_locked_by_current_thread(&self) -> bool {
            self.core.is_owner()
        }
        fn name(&self) -> &str {
            "host-mutex"
        }
    }

    #[test]
    fn test_bound_lock_delegates() {
        let host = Arc::new(HostMutex::default());
        let lock = RecursiveLock::bind(host.clone(), 10);

        assert!(lock.is_bound());
        assert_eq!(lock.name(), "host-mutex");
        lock.enable_stats(true);
        assert!(!lock.stats().measure_acquisition());

        lock.acquire();
        assert!(lock.is_held_by_current_thread());
        assert!(host.core.is_owner());
        // Bound locks are the host's business: no tracking
        assert!(!any_locks_held());
        assert!(lock.try_acquire());
        lock.release();
        lock.release();
        assert!(!lock.is_held_by_current_thread());
        assert_eq!(host.calls.load(Ordering::SeqCst), 4);

        assert!(catch_fatal(|| lock.create_cond_var("bound-cv")).is_err());
        lock.destroy();
        // The host mutex outlives the wrapper
        host.lock();
        host.unlock();
    }
}
