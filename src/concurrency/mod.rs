//! MXUser synchronization primitives
//!
//! Every primitive carries a [`LockHeader`] (name, rank, kind signature,
//! serial number), registers itself in the process [`registry`], and routes
//! misuse to [`crate::fatal`]:
//!
//! - [`ExclusiveLock`]: non-recursive mutex
//! - [`RecursiveLock`]: recursive mutex, owned or bound to a host mutex
//! - [`ReadWriteLock`]: native reader-writer lock or single-owner emulation
//! - [`Semaphore`]: counting semaphore starting at zero
//! - [`ConditionVariable`]: bound to the one lock it was created from
//! - [`Barrier`]: reusable N-thread barrier
//! - [`RankLock`]: rank marker with no mutual exclusion
//!
//! Acquisitions pass through a per-thread tracker that enforces strictly
//! ascending ranks.

pub mod barrier;
pub mod condvar;
pub mod excl_lock;
pub mod header;
pub mod rank;
pub mod rank_lock;
pub(crate) mod rec_lock;
pub mod recursive_lock;
pub mod registry;
pub mod rw_lock;
pub mod semaphore;

pub use barrier::Barrier;
pub use condvar::{CondVarLock, ConditionVariable};
pub use excl_lock::{ExclusiveGuard, ExclusiveLock};
pub use header::{
    LockDump, LockHeader, LockKind, LockObject, Rank, MAX_LOCKS_PER_THREAD, MAX_REC_DEPTH, RANK_LEAF,
    RANK_UNRANKED,
};
pub use rank::{any_locks_held, dump_held_locks, held_locks, HeldLock};
pub use rank_lock::RankLock;
pub use recursive_lock::{ExternalMutex, RecursiveGuard, RecursiveLock};
pub use registry::{list_locks, run_stats_epoch, shutdown, SingletonCell};
pub use rw_lock::{HolderState, ReadWriteLock, RwGuard, RwQuery};
pub use semaphore::Semaphore;

use crate::config::{Config, LockConfig};
use crate::error::Result;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

/// Test hook deciding whether a try-acquire on the named lock should fail
pub type TryAcquireFailureHook = fn(&str) -> bool;

static TRY_ACQUIRE_HOOK: Lazy<RwLock<Option<TryAcquireFailureHook>>> = Lazy::new(|| RwLock::new(None));

static LOCK_SETTINGS: Lazy<RwLock<LockConfig>> = Lazy::new(|| RwLock::new(LockConfig::default()));

/// Install (or with `None`, remove) the try-acquire failure hook
///
/// While installed, every `try_acquire`/`try_down` asks the hook first and
/// reports failure without touching the primitive when it returns true.
pub fn set_try_acquire_failure_hook(hook: Option<TryAcquireFailureHook>) {
    *TRY_ACQUIRE_HOOK.write() = hook;
}

#[inline]
pub(crate) fn try_acquire_should_fail(name: &str) -> bool {
    match *TRY_ACQUIRE_HOOK.read() {
        Some(hook) => hook(name),
        None => false,
    }
}

/// Validate and install backend settings for primitives created from now on
pub fn install(config: &LockConfig) -> Result<()> {
    config.validate()?;
    *LOCK_SETTINGS.write() = config.clone();
    Ok(())
}

pub(crate) fn lock_settings() -> LockConfig {
    LOCK_SETTINGS.read().clone()
}
