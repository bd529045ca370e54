//! Monotonic time source for samples
//!
//! All statistics work in nanoseconds since a process-local origin. Only
//! differences between two readings are meaningful.

use once_cell::sync::Lazy;
use std::time::Instant;

static ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

/// Nanoseconds since the process-local origin
#[inline]
pub fn now_ns() -> u64 {
    ORIGIN.elapsed().as_nanos() as u64
}

/// Nanoseconds elapsed since `start`, a value previously returned by [`now_ns`]
#[inline]
pub fn elapsed_ns(start: u64) -> u64 {
    now_ns().saturating_sub(start)
}
