//! Reader-writer lock
//!
//! Many readers or one writer on the native backend. Where the native
//! reader-writer lock is switched off, the lock falls back to a reentrant
//! core and admits a single holder of either kind; such instances carry an
//! `_Emul` name suffix.

use super::header::{LockDump, LockHeader, LockKind, LockObject, Rank};
use super::rank::{ensure_capacity, is_tracked, track_acquire, track_release};
use super::rec_lock::RecLockCore;
use super::registry::{register, unregister, SingletonCell};
use super::{lock_settings, try_acquire_should_fail};
use crate::statistics::{elapsed_ns, now_ns, LockStats};
use crate::thread::{current_thread_key, NativeRwLock, ThreadKey};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// What a thread holds of a read-write lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderState {
    Unlocked,
    ReadHeld,
    WriteHeld,
}

/// Mode for [`ReadWriteLock::is_held_by_current_thread`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RwQuery {
    Read,
    Write,
    Any,
}

#[derive(Debug, Clone, Copy)]
struct HolderContext {
    state: HolderState,
    hold_start: u64,
}

enum RwBackend {
    Native(NativeRwLock),
    Emulated(RecLockCore),
}

/// A reader-writer lock with per-thread holder tracking
///
/// Runs on a native shared lock or, when configured, on an emulation built
/// from a recursive lock core, whose name carries an `_Emul` suffix.
pub struct ReadWriteLock {
    header: LockHeader,
    backend: RwBackend,
    holder_count: AtomicU32,
    holders: DashMap<ThreadKey, HolderContext>,
    stats: LockStats,
}

impl ReadWriteLock {
    /// Create and register a read-write lock, using the backend chosen by the
    /// installed [`LockConfig`](crate::config::LockConfig)
    pub fn create(name: &str, rank: Rank) -> Arc<Self> {
        Self::create_with_backend(name, rank, lock_settings().native_rwlock)
    }

    /// Create with an explicit backend choice
    pub fn create_with_backend(name: &str, rank: Rank, native: bool) -> Arc<Self> {
        let (backend, name) = if native {
            (RwBackend::Native(NativeRwLock::new()), name.to_string())
        } else {
            (RwBackend::Emulated(RecLockCore::new()), format!("{}_Emul", name))
        };

        let lock = Arc::new(Self {
            header: LockHeader::new(LockKind::ReadWrite, &name, rank),
            backend,
            holder_count: AtomicU32::new(0),
            holders: DashMap::new(),
            stats: LockStats::new(),
        });
        register(&lock);
        lock
    }

    /// The lock stored in `cell`, created on first use
    pub fn create_singleton(cell: &SingletonCell<ReadWriteLock>, name: &str, rank: Rank) -> Arc<Self> {
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

    /// Whether the native shared-lock backend is in use
    pub fn is_native(&self) -> bool {
        matches!(self.backend, RwBackend::Native(_))
    }

    /// Number of threads currently holding the lock in either mode
    pub fn holder_count(&self) -> u32 {
        self.holder_count.load(Ordering::Acquire)
    }

    fn state_of(&self, key: ThreadKey) -> HolderState {
        self.holders
            .get(&key)
            .map(|ctx| ctx.state)
            .unwrap_or(HolderState::Unlocked)
    }

    fn check_not_held(&self, key: ThreadKey, for_write: bool) {
        let message = match (self.state_of(key), for_write) {
            (HolderState::Unlocked, _) => return,
            (HolderState::ReadHeld, false) => "acquire for read on a read-held read-write lock",
            (HolderState::ReadHeld, true) => "acquire for write on a read-held read-write lock",
            (HolderState::WriteHeld, false) => "acquire for read on a write-held read-write lock",
            (HolderState::WriteHeld, true) => "acquire for write on a write-held read-write lock",
        };
        self.die(message);
    }

    fn lock_native(&self, for_write: bool, measure: bool) -> (bool, u64) {
        match &self.backend {
            RwBackend::Native(rw) => {
                let (try_lock, lock): (fn(&NativeRwLock) -> bool, fn(&NativeRwLock)) = if for_write {
                    (NativeRwLock::try_lock_exclusive, NativeRwLock::lock_exclusive)
                } else {
                    (NativeRwLock::try_lock_shared, NativeRwLock::lock_shared)
                };
                if !measure {
                    lock(rw);
                    return (false, 0);
                }
                if try_lock(rw) {
                    return (false, 0);
                }
                let start = now_ns();
                lock(rw);
                (true, elapsed_ns(start))
            }
            RwBackend::Emulated(core) => {
                let outcome = core
                    .acquire(measure)
                    .unwrap_or_else(|misuse| self.die(&misuse.to_string()));
                (outcome.contended, outcome.wait_ns)
            }
        }
    }

    fn try_lock_native(&self, for_write: bool) -> bool {
        match &self.backend {
            RwBackend::Native(rw) if for_write => rw.try_lock_exclusive(),
            RwBackend::Native(rw) => rw.try_lock_shared(),
            RwBackend::Emulated(core) => core
                .try_acquire()
                .unwrap_or_else(|misuse| self.die(&misuse.to_string())),
        }
    }

    fn enter(&self, key: ThreadKey, for_write: bool) {
        let state = if for_write {
            HolderState::WriteHeld
        } else {
            HolderState::ReadHeld
        };
        let hold_start = if self.stats.track_held() { now_ns() } else { 0 };
        self.holders.insert(key, HolderContext { state, hold_start });
        self.holder_count.fetch_add(1, Ordering::AcqRel);
    }

    fn acquire(&self, for_write: bool) {
        self.header.validate(LockKind::ReadWrite);
        let key = current_thread_key();
        self.check_not_held(key, for_write);

        track_acquire(&self.header, true);

        let measure = self.stats.measure_acquisition();
        let (contended, wait_ns) = self.lock_native(for_write, measure);
        if measure {
            self.stats.record_acquisition(true, contended, wait_ns);
        }
        self.enter(key, for_write);
    }

    fn try_acquire(&self, for_write: bool) -> bool {
        self.header.validate(LockKind::ReadWrite);
        if try_acquire_should_fail(self.header.name()) {
            return false;
        }
        let key = current_thread_key();
        self.check_not_held(key, for_write);
        ensure_capacity(&self.header);

        let acquired = self.try_lock_native(for_write);
        if self.stats.measure_acquisition() {
            self.stats.record_acquisition(acquired, false, 0);
        }
        if acquired {
            track_acquire(&self.header, false);
            self.enter(key, for_write);
        }
        acquired
    }

    /// Block until the calling thread holds the lock for reading
    pub fn acquire_for_read(&self) {
        self.acquire(false);
    }

    /// Block until the calling thread holds the lock for writing
    pub fn acquire_for_write(&self) {
        self.acquire(true);
    }

    /// Take the lock for reading if that is possible without blocking
    pub fn try_acquire_for_read(&self) -> bool {
        self.try_acquire(false)
    }

    /// Take the lock for writing if that is possible without blocking
    pub fn try_acquire_for_write(&self) -> bool {
        self.try_acquire(true)
    }

    /// Release whichever mode the calling thread holds
    pub fn release(&self) {
        self.header.validate(LockKind::ReadWrite);
        let key = current_thread_key();
        let Some((_, ctx)) = self.holders.remove(&key) else {
            self.die("release of an unacquired read-write lock");
        };

        self.holder_count.fetch_sub(1, Ordering::AcqRel);
        if self.stats.track_held() && ctx.hold_start != 0 {
            self.stats.record_held(elapsed_ns(ctx.hold_start));
        }
        track_release(&self.header);

        match &self.backend {
            // SAFETY: the holder map says this thread took the matching mode
            RwBackend::Native(rw) => unsafe {
                match ctx.state {
                    HolderState::WriteHeld => rw.unlock_exclusive(),
                    _ => rw.unlock_shared(),
                }
            },
            RwBackend::Emulated(core) => {
                core.release()
                    .unwrap_or_else(|misuse| self.die(&misuse.to_string()));
            }
        }
    }

    /// Whether the calling thread holds the lock in the queried mode
    pub fn is_held_by_current_thread(&self, query: RwQuery) -> bool {
        self.header.validate(LockKind::ReadWrite);
        match (self.state_of(current_thread_key()), query) {
            (HolderState::Unlocked, _) => false,
            (_, RwQuery::Any) => true,
            (HolderState::ReadHeld, RwQuery::Read) => true,
            (HolderState::WriteHeld, RwQuery::Write) => true,
            _ => false,
        }
    }

    /// Acquire for reading and return a guard that releases on drop
    pub fn read(&self) -> RwGuard<'_> {
        self.acquire_for_read();
        RwGuard { lock: self }
    }

    /// Acquire for writing and return a guard that releases on drop
    pub fn write(&self) -> RwGuard<'_> {
        self.acquire_for_write();
        RwGuard { lock: self }
    }

    /// Start collecting statistics, optionally including held times
    pub fn enable_stats(&self, track_held: bool) {
        self.header.validate(LockKind::ReadWrite);
        self.stats.enable(track_held);
    }

    /// Stop collecting statistics
    pub fn disable_stats(&self) {
        self.header.validate(LockKind::ReadWrite);
        self.stats.disable();
    }

    /// Statistics collected for this lock
    pub fn stats(&self) -> &LockStats {
        &self.stats
    }

    /// Destroy the lock; nobody may hold it
    pub fn destroy(self: Arc<Self>) {
        self.header.validate(LockKind::ReadWrite);
        if self.holder_count() > 0 {
            self.die("destroy of an acquired read-write lock");
        }
        self.header.mark_destroyed();
        unregister(self.header.serial());
    }
}

impl LockObject for ReadWriteLock {
    fn header(&self) -> &LockHeader {
        &self.header
    }

    fn dump(&self) -> LockDump {
        let backend = if self.is_native() { "native" } else { "emulated" };
        self.header
            .dump(format!("holders={} backend={}", self.holder_count(), backend))
    }

    fn report_stats(&self) {
        self.stats.report(self.header.name(), self.header.serial());
    }
}

impl Drop for ReadWriteLock {
    fn drop(&mut self) {
        unregister(self.header.serial());
        if self.holder_count() > 0 && !std::thread::panicking() {
            if is_tracked(&self.header) {
                track_release(&self.header);
            }
            self.die("drop of an acquired read-write lock");
        }
    }
}

/// Holds a [`ReadWriteLock`] in read or write mode until dropped
#[must_use = "the lock is released when the guard is dropped"]
pub struct RwGuard<'a> {
    lock: &'a ReadWriteLock,
}

impl Drop for RwGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
