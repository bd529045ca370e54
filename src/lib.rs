//! # MXUser: Instrumented Synchronization Primitives
//!
//! Mutexes, read-write locks, semaphores, condition variables and barriers
//! with a uniform identity, deterministic lock-order checking and optional
//! contention statistics.
//!
//! ## Key Features
//!
//! - **Lock identity**: every primitive has a name, a rank, a kind signature
//!   and a process-unique serial number
//! - **Rank checking**: per-thread tracking turns lock-order inversions into
//!   immediate, reproducible fatal reports instead of rare deadlocks
//! - **Fatal misuse**: double acquisition, foreign release, use after destroy
//!   and the like end in a [`FatalReport`] handed to a pluggable handler
//! - **Statistics**: acquisition, contention and held-time sampling with
//!   log-scale histograms for locks that run hot
//! - **Singleton cells**: lazily create exactly one primitive per storage
//!   location, race free
//!
//! ## Quick Start
//!
//! ```rust
//! use mxuser::{ExclusiveLock, ReadWriteLock, RwQuery, Semaphore};
//!
//! let lock = ExclusiveLock::create("disk", 0x10);
//! {
//!     let _guard = lock.lock();
//!     assert!(lock.is_held_by_current_thread());
//! }
//!
//! let table = ReadWriteLock::create("table", 0x20);
//! table.acquire_for_read();
//! assert!(table.is_held_by_current_thread(RwQuery::Read));
//! table.release();
//!
//! let sem = Semaphore::create("requests", 0x30);
//! sem.up();
//! assert!(sem.try_down());
//! ```

#![deny(unsafe_op_in_unsafe_fn)]

pub mod concurrency;
pub mod config;
pub mod error;
pub mod fatal;
pub mod statistics;
pub mod thread;

pub use concurrency::{
    any_locks_held, dump_held_locks, held_locks, list_locks, run_stats_epoch, set_try_acquire_failure_hook,
    shutdown, Barrier, ConditionVariable, ExclusiveGuard, ExclusiveLock, ExternalMutex, HeldLock, LockDump,
    LockKind, RankLock, RecursiveGuard, RecursiveLock, ReadWriteLock, RwGuard, RwQuery, Semaphore,
    SingletonCell, MAX_LOCKS_PER_THREAD, MAX_REC_DEPTH, RANK_LEAF, RANK_UNRANKED,
};
pub use config::{Config, LockConfig, StatsConfig};
pub use error::{MxUserError, Result};
pub use fatal::{catch_fatal, clear_fatal_handler, set_fatal_handler, set_in_panic, AbortOnFatal, FatalHandler, FatalReport};
pub use statistics::{
    register_stats_sink, set_contention_count_floor, set_contention_duration_floor,
    set_contention_ratio_floor, StatsSink,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install the process-wide tunables
///
/// Both configurations are validated first; nothing is installed if either
/// is invalid. Settings apply to primitives created afterwards, except for
/// the contention floors which apply on the next statistics epoch.
pub fn init(stats: &StatsConfig, locks: &LockConfig) -> Result<()> {
    stats.validate()?;
    locks.validate()?;
    statistics::install(stats)?;
    concurrency::install(locks)?;
    log::debug!(
        "Initializing mxuser v{} (stats by default: {}, native rwlock: {})",
        VERSION,
        stats.enabled_by_default,
        locks.native_rwlock
    );
    Ok(())
}
