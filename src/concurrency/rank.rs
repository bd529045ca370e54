//! Per-thread held-lock tracking and rank checking
//!
//! Each thread keeps a small stack of the primitives it currently holds.
//! Taking a ranked lock whose rank is not above every rank already held is a
//! lock-order violation and is fatal, so ordering bugs surface the first time
//! the bad path runs instead of as an occasional deadlock.

use super::header::{LockHeader, Rank, MAX_LOCKS_PER_THREAD, RANK_UNRANKED};
use crate::fatal::{fatal, rank_checks_suppressed};
use std::cell::RefCell;
use std::sync::Arc;

/// A lock currently held by the calling thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldLock {
    pub serial: u64,
    pub rank: Rank,
    pub name: Arc<str>,
}

thread_local! {
    static HELD: RefCell<Vec<HeldLock>> = const { RefCell::new(Vec::new()) };
}

enum Violation {
    Rank { held: HeldLock },
    TooMany,
}

/// Record that the calling thread now holds the primitive of `header`
///
/// With `check_rank`, a ranked primitive must outrank every lock already
/// held.
pub(crate) fn track_acquire(header: &LockHeader, check_rank: bool) {
    let rank = header.rank();
    let violation = HELD.with(|held| {
        let mut held = held.borrow_mut();

        if check_rank && rank != RANK_UNRANKED && !rank_checks_suppressed() {
            if let Some(top) = held.iter().max_by_key(|h| h.rank) {
                if top.rank >= rank {
                    return Some(Violation::Rank { held: top.clone() });
                }
            }
        }

        if held.len() >= MAX_LOCKS_PER_THREAD {
            return Some(Violation::TooMany);
        }

        held.push(HeldLock {
            serial: header.serial(),
            rank,
            name: header.shared_name(),
        });
        None
    });

    match violation {
        None => {}
        Some(Violation::Rank { held }) => {
            dump_held_locks();
            fatal(
                Some(header.dump("acquiring")),
                format!(
                    "lock rank violation: acquiring {} (rank 0x{:x}) while holding {} (rank 0x{:x})",
                    header.name(),
                    rank,
                    held.name,
                    held.rank
                ),
            )
        }
        Some(Violation::TooMany) => too_many_locks(header),
    }
}

fn too_many_locks(header: &LockHeader) -> ! {
    dump_held_locks();
    fatal(
        Some(header.dump("acquiring")),
        format!(
            "too many locks held by one thread ({}) while acquiring {}",
            MAX_LOCKS_PER_THREAD,
            header.name()
        ),
    )
}

/// Die unless the calling thread can record one more held lock
///
/// Non-blocking acquisitions call this before taking the primitive.
pub(crate) fn ensure_capacity(header: &LockHeader) {
    let full = HELD.with(|held| held.borrow().len() >= MAX_LOCKS_PER_THREAD);
    if full {
        too_many_locks(header);
    }
}

/// Remove the primitive of `header` from the calling thread's held set
pub(crate) fn track_release(header: &LockHeader) {
    let serial = header.serial();
    let found = HELD.with(|held| {
        let mut held = held.borrow_mut();
        match held.iter().rposition(|h| h.serial == serial) {
            Some(index) => {
                held.swap_remove(index);
                true
            }
            None => false,
        }
    });

    if !found {
        fatal(
            Some(header.dump("releasing")),
            format!("release of {} which this thread does not hold", header.name()),
        );
    }
}

/// True if the calling thread's held set contains `header`
pub(crate) fn is_tracked(header: &LockHeader) -> bool {
    let serial = header.serial();
    HELD.with(|held| held.borrow().iter().any(|h| h.serial == serial))
}

/// Locks held by the calling thread
pub fn held_locks() -> Vec<HeldLock> {
    HELD.with(|held| held.borrow().clone())
}

/// Whether the calling thread holds any tracked lock
pub fn any_locks_held() -> bool {
    HELD.with(|held| !held.borrow().is_empty())
}

/// Log the calling thread's held locks
pub fn dump_held_locks() {
    let held = held_locks();
    if held.is_empty() {
        log::warn!("MXUser: thread holds no locks");
        return;
    }
    log::warn!("MXUser: thread holds {} lock(s):", held.len());
    for lock in &held {
        log::warn!("MXUser:   {} l={} r=0x{:x}", lock.name, lock.serial, lock.rank);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::header::{LockKind, RANK_LEAF};
    use crate::fatal::catch_fatal;

    fn header(name: &str, rank: Rank) -> LockHeader {
        LockHeader::new(LockKind::Rank, name, rank)
    }

    #[test]
    fn test_ascending_ok_descending_fatal() {
        let a = header("a", 1);
        let b = header("b", 2);

        track_acquire(&a, true);
        track_acquire(&b, true);
        assert_eq!(held_locks().len(), 2);
        track_release(&b);
        track_release(&a);
        assert!(!any_locks_held());

        track_acquire(&b, true);
        let report = catch_fatal(|| track_acquire(&a, true)).unwrap_err();
        assert!(report.message.contains("lock rank violation"));
        assert!(report.message.contains("acquiring a"));
        track_release(&b);
        assert!(!any_locks_held());
    }

    #[test]
    fn test_equal_rank_is_violation() {
        let a = header("eq-a", 7);
        let b = header("eq-b", 7);
        track_acquire(&a, true);
        assert!(catch_fatal(|| track_acquire(&b, true)).is_err());
        track_release(&a);
    }

    #[test]
    fn test_unranked_and_unchecked_exempt() {
        let leaf = header("leaf", RANK_LEAF);
        let free = header("free", RANK_UNRANKED);
        let low = header("low", 3);

        track_acquire(&leaf, true);
        track_acquire(&free, true);
        track_acquire(&low, false);
        assert_eq!(held_locks().len(), 3);
        assert!(is_tracked(&low));

        track_release(&leaf);
        track_release(&low);
        track_release(&free);
        assert!(!any_locks_held());
    }

    #[test]
    fn test_swap_removal_any_order() {
        let locks: Vec<_> = (1..=4).map(|r| header("s", r)).collect();
        for l in &locks {
            track_acquire(l, true);
        }
        track_release(&locks[1]);
        track_release(&locks[0]);
        let remaining: Vec<u64> = held_locks().iter().map(|h| h.serial).collect();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.contains(&locks[2].serial()));
        assert!(remaining.contains(&locks[3].serial()));
        track_release(&locks[3]);
        track_release(&locks[2]);
    }

    #[test]
    fn test_release_untracked_fatal() {
        let a = header("ghost", 1);
        let report = catch_fatal(|| track_release(&a)).unwrap_err();
        assert!(report.message.contains("does not hold"));
    }

    #[test]
    fn test_per_thread_limit() {
        let locks: Vec<_> = (0..=MAX_LOCKS_PER_THREAD).map(|_| header("many", RANK_UNRANKED)).collect();
        for l in &locks[..MAX_LOCKS_PER_THREAD] {
            track_acquire(l, true);
        }
        let report = catch_fatal(|| track_acquire(&locks[MAX_LOCKS_PER_THREAD], true)).unwrap_err();
        assert!(report.message.contains("too many locks"));
        for l in &locks[..MAX_LOCKS_PER_THREAD] {
            track_release(l);
        }
        assert!(!any_locks_held());
    }

    #[test]
    fn test_tracking_is_per_thread() {
        let a = header("pt-a", 1);
        let b = header("pt-b", 2);
        track_acquire(&b, true);
        std::thread::scope(|s| {
            s.spawn(|| {
                assert!(!any_locks_held());
                track_acquire(&a, true);
                track_release(&a);
            });
        });
        track_release(&b);
    }
}
