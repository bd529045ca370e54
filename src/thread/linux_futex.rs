//! Linux Futex Integration
//!
//! Direct futex syscalls backing the native condition variable and semaphore.

use super::{FutexWait, PlatformSync};
use crate::error::{MxUserError, Result};
use std::sync::atomic::AtomicU32;
use std::time::Duration;

mod sys {
    use libc::{c_int, c_long, syscall, time_t, timespec, SYS_futex};
    use std::ptr;
    use std::time::Duration;

    pub const FUTEX_WAIT_PRIVATE: c_int = 128;
    pub const FUTEX_WAKE_PRIVATE: c_int = 129;

    /// Direct futex syscall wrapper
    #[inline]
    pub unsafe fn futex(
        uaddr: *const u32,
        op: c_int,
        val: u32,
        timeout: *const timespec,
        uaddr2: *const u32,
        val3: u32,
    ) -> c_long {
        unsafe { syscall(SYS_futex, uaddr, op, val, timeout, uaddr2, val3) }
    }

    /// Wait on futex with optional relative timeout
    #[inline]
    pub unsafe fn futex_wait(uaddr: *const u32, val: u32, timeout: Option<Duration>) -> c_long {
        let ts;
        let timeout_ptr = match timeout {
            Some(d) => {
                ts = timespec {
                    tv_sec: d.as_secs().min(time_t::MAX as u64) as time_t,
                    tv_nsec: d.subsec_nanos() as c_long,
                };
                &ts as *const timespec
            }
            None => ptr::null(),
        };

        unsafe { futex(uaddr, FUTEX_WAIT_PRIVATE, val, timeout_ptr, ptr::null(), 0) }
    }

    /// Wake waiters on futex
    #[inline]
    pub unsafe fn futex_wake(uaddr: *const u32, count: u32) -> c_long {
        unsafe { futex(uaddr, FUTEX_WAKE_PRIVATE, count, ptr::null(), ptr::null(), 0) }
    }
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Linux-specific futex implementation
pub struct LinuxFutex;

impl PlatformSync for LinuxFutex {
    fn futex_wait(addr: &AtomicU32, val: u32, timeout: Option<Duration>) -> Result<FutexWait> {
        // SAFETY: `addr` is a live AtomicU32 for the duration of the call.
        let result = unsafe { sys::futex_wait(addr.as_ptr(), val, timeout) };
        if result == -1 {
            match last_errno() {
                libc::EAGAIN => Ok(FutexWait::ValueChanged),
                libc::ETIMEDOUT => Ok(FutexWait::TimedOut),
                libc::EINTR => Ok(FutexWait::Interrupted),
                errno => Err(MxUserError::system(format!("futex wait failed: errno {}", errno))),
            }
        } else {
            Ok(FutexWait::Woken)
        }
    }

    fn futex_wake(addr: &AtomicU32, count: u32) -> Result<usize> {
        // SAFETY: `addr` is a live AtomicU32 for the duration of the call.
        let result = unsafe { sys::futex_wake(addr.as_ptr(), count.min(i32::MAX as u32)) };
        if result == -1 {
            Err(MxUserError::system(format!("futex wake failed: errno {}", last_errno())))
        } else {
            Ok(result as usize)
        }
    }
}
