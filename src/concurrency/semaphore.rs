//! Counting semaphore

use super::header::{LockDump, LockHeader, LockKind, LockObject, Rank};
use super::rank::{track_acquire, track_release};
use super::registry::{register, unregister, SingletonCell};
use super::try_acquire_should_fail;
use crate::statistics::{elapsed_ns, now_ns, LockStats};
use crate::thread::NativeSemaphore;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Counting semaphore; the count starts at zero
///
/// A thread blocked in [`down`](Self::down) or
/// [`timed_down`](Self::timed_down) counts as holding the semaphore for rank
/// checking until the call returns.
pub struct Semaphore {
    header: LockHeader,
    sem: NativeSemaphore,
    active_users: AtomicU32,
    stats: LockStats,
}

struct ActiveUse<'a>(&'a AtomicU32);

impl<'a> ActiveUse<'a> {
    fn enter(users: &'a AtomicU32) -> Self {
        users.fetch_add(1, Ordering::AcqRel);
        ActiveUse(users)
    }
}

impl Drop for ActiveUse<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Semaphore {
    /// Create and register a semaphore
    pub fn create(name: &str, rank: Rank) -> Arc<Self> {
        let sem = Arc::new(Self {
            header: LockHeader::new(LockKind::Semaphore, name, rank),
            sem: NativeSemaphore::new(),
            active_users: AtomicU32::new(0),
            stats: LockStats::new(),
        });
        register(&sem);
        sem
    }

    /// The semaphore stored in `cell`, created on first use
    pub fn create_singleton(cell: &SingletonCell<Semaphore>, name: &str, rank: Rank) -> Arc<Self> {
        cell.get_or_init(|| Self::create(name, rank))
    }

    /// Name given at creation
    pub fn name(&self) -> &str {
        self.header.name()
    }

    /// Rank checked on blocking downs
    pub fn rank(&self) -> Rank {
        self.header.rank()
    }

    /// Registry serial number
    pub fn serial(&self) -> u64 {
        self.header.serial()
    }

    /// Current count (racy snapshot)
    pub fn count(&self) -> u32 {
        self.sem.count()
    }

    fn down_internal(&self, timeout: Option<Duration>) -> bool {
        self.header.validate(LockKind::Semaphore);
        let _active = ActiveUse::enter(&self.active_users);

        track_acquire(&self.header, true);

        let measure = self.stats.measure_acquisition();
        let (downed, contended, wait_ns) = if self.sem.try_down() {
            (true, false, 0)
        } else {
            let start = if measure { now_ns() } else { 0 };
            let downed = match timeout {
                None => {
                    self.sem.down();
                    true
                }
                Some(timeout) => self.sem.timed_down(timeout),
            };
            (downed, true, if measure { elapsed_ns(start) } else { 0 })
        };

        if measure {
            self.stats.record_acquisition(downed, contended, wait_ns);
        }
        track_release(&self.header);
        downed
    }

    /// Decrement, blocking while the count is zero
    pub fn down(&self) {
        self.down_internal(None);
    }

    /// Decrement, waiting at most `timeout`; false if it elapsed
    ///
    /// The full timeout is waited out before giving up.
    pub fn timed_down(&self, timeout: Duration) -> bool {
        self.down_internal(Some(timeout))
    }

    /// Decrement if the count is positive; never blocks
    pub fn try_down(&self) -> bool {
        self.header.validate(LockKind::Semaphore);
        if try_acquire_should_fail(self.header.name()) {
            return false;
        }
        let _active = ActiveUse::enter(&self.active_users);

        let downed = self.sem.try_down();
        if self.stats.measure_acquisition() {
            self.stats.record_acquisition(downed, false, 0);
        }
        downed
    }

    /// Increment and wake one waiter
    pub fn up(&self) {
        self.header.validate(LockKind::Semaphore);
        let _active = ActiveUse::enter(&self.active_users);
        self.sem.up();
    }

    /// Start collecting acquisition statistics
    pub fn enable_stats(&self) {
        self.header.validate(LockKind::Semaphore);
        self.stats.enable(false);
    }

    /// Stop collecting statistics
    pub fn disable_stats(&self) {
        self.header.validate(LockKind::Semaphore);
        self.stats.disable();
    }

    /// Statistics collected for this semaphore
    pub fn stats(&self) -> &LockStats {
        &self.stats
    }

    /// Destroy the semaphore; no thread may be inside an operation on it
    pub fn destroy(self: Arc<Self>) {
        self.header.validate(LockKind::Semaphore);
        if self.active_users.load(Ordering::Acquire) != 0 {
            self.die("destroy of a semaphore in use");
        }
        self.header.mark_destroyed();
        unregister(self.header.serial());
    }
}

impl LockObject for Semaphore {
    fn header(&self) -> &LockHeader {
        &self.header
    }

    fn dump(&self) -> LockDump {
        self.header.dump(format!(
            "count={} active={}",
            self.count(),
            self.active_users.load(Ordering::Acquire)
        ))
    }

    fn report_stats(&self) {
        self.stats.report(self.header.name(), self.header.serial());
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unregister(self.header.serial());
        if self.active_users.load(Ordering::Acquire) != 0 && !std::thread::panicking() {
            self.die("drop of a semaphore in use");
        }
    }
}
