//! Portable futex emulation
//!
//! Waiters park on one of a fixed set of parking_lot mutex/condvar buckets
//! selected by the address of the word they wait on. A wake call notifies the
//! whole bucket; unrelated waiters sharing the bucket see a spurious wakeup,
//! which every caller of [`PlatformSync::futex_wait`] already tolerates.

use super::{FutexWait, PlatformSync};
use crate::error::Result;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

const BUCKET_COUNT: usize = 64;

struct Bucket {
    lock: Mutex<()>,
    cond: Condvar,
}

static BUCKETS: [Bucket; BUCKET_COUNT] = {
    #[allow(clippy::declare_interior_mutable_const)]
    const EMPTY: Bucket = Bucket {
        lock: Mutex::new(()),
        cond: Condvar::new(),
    };
    [EMPTY; BUCKET_COUNT]
};

#[inline]
fn bucket_for(addr: &AtomicU32) -> &'static Bucket {
    let key = addr as *const AtomicU32 as usize;
    // Fibonacci hashing spreads neighbouring words over different buckets.
    let hash = key.wrapping_mul(0x9E37_79B9_7F4A_7C15_u64 as usize);
    &BUCKETS[(hash >> 8) % BUCKET_COUNT]
}

/// Futex emulation on parking_lot wait buckets
pub struct ParkingSync;

impl PlatformSync for ParkingSync {
    fn futex_wait(addr: &AtomicU32, val: u32, timeout: Option<Duration>) -> Result<FutexWait> {
        let bucket = bucket_for(addr);
        let mut guard = bucket.lock.lock();

        // Wakers change the word before taking the bucket lock, so checking
        // under the lock cannot miss a wake.
        if addr.load(Ordering::Acquire) != val {
            return Ok(FutexWait::ValueChanged);
        }

        match timeout {
            Some(timeout) => {
                if bucket.cond.wait_for(&mut guard, timeout).timed_out() {
                    Ok(FutexWait::TimedOut)
                } else {
                    Ok(FutexWait::Woken)
                }
            }
            None => {
                bucket.cond.wait(&mut guard);
                Ok(FutexWait::Woken)
            }
        }
    }

    fn futex_wake(addr: &AtomicU32, _count: u32) -> Result<usize> {
        let bucket = bucket_for(addr);
        let _guard = bucket.lock.lock();
        Ok(bucket.cond.notify_all())
    }
}
