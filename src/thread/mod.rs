//! Native primitive bindings
//!
//! This module is the only place that knows how the host OS blocks a thread:
//! - [`PlatformSync`]: futex-style wait/wake on an `AtomicU32`, implemented by
//!   direct `futex(2)` calls on Linux and by hashed parking_lot wait buckets
//!   everywhere else
//! - [`NativeMutex`], [`NativeRwLock`], [`NativeCondvar`], [`NativeSemaphore`]:
//!   the raw primitives the MXUser locks are built from
//! - Thread identity and a few atomic helpers

#[cfg(target_os = "linux")]
pub mod linux_futex;

pub mod atomic_ext;
pub mod native;
pub mod parking;

#[cfg(test)]
mod simple_tests;

#[cfg(target_os = "linux")]
pub use linux_futex::LinuxFutex;
pub use atomic_ext::AtomicExt;
pub use native::{NativeCondvar, NativeMutex, NativeRwLock, NativeSemaphore};
pub use parking::ParkingSync;

use crate::error::Result;
use lock_api::GetThreadId;
use std::num::NonZeroUsize;
use std::sync::atomic::AtomicU32;
use std::time::Duration;

/// Outcome of a futex-style wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutexWait {
    /// Woken by a wake call (or spuriously)
    Woken,
    /// The value no longer matched when the wait started
    ValueChanged,
    /// The timeout elapsed
    TimedOut,
    /// Interrupted by a signal before anything happened
    Interrupted,
}

/// Cross-platform futex abstraction
pub trait PlatformSync {
    /// Block while `*addr == val`, for at most `timeout` if given
    fn futex_wait(addr: &AtomicU32, val: u32, timeout: Option<Duration>) -> Result<FutexWait>;

    /// Wake up to `count` threads blocked on `addr`
    fn futex_wake(addr: &AtomicU32, count: u32) -> Result<usize>;
}

/// Platform-specific implementation selector
#[cfg(target_os = "linux")]
pub type DefaultPlatformSync = LinuxFutex;

#[cfg(not(target_os = "linux"))]
pub type DefaultPlatformSync = ParkingSync;

/// Opaque identity of a live thread; never zero
pub type ThreadKey = NonZeroUsize;

/// Identity of the calling thread
///
/// Unique among live threads. A key may be reused once its thread has exited.
#[inline]
pub fn current_thread_key() -> ThreadKey {
    parking_lot::RawThreadId.nonzero_thread_id()
}
