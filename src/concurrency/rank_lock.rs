//! Rank-only lock
//!
//! Guards nothing. Acquiring it only records its rank on the calling thread,
//! which lets code assert that it sits at a given point of the lock order.

use super::header::{LockDump, LockHeader, LockKind, LockObject, Rank};
use super::rank::{is_tracked, track_acquire, track_release};
use super::registry::{register, unregister};
use std::sync::Arc;

/// A marker lock that only takes part in rank checking
///
/// Acquiring it records a held entry for the calling thread so later
/// acquisitions are ordered against its rank; it excludes nobody.
pub struct RankLock {
    header: LockHeader,
}

impl RankLock {
    /// Create and register a rank marker
    pub fn create(name: &str, rank: Rank) -> Arc<Self> {
        let lock = Arc::new(Self {
            header: LockHeader::new(LockKind::Rank, name, rank),
        });
        register(&lock);
        lock
    }

    /// Name given at creation
    pub fn name(&self) -> &str {
        self.header.name()
    }

    /// Rank checked on acquire
    pub fn rank(&self) -> Rank {
        self.header.rank()
    }

    /// Rank check and record the marker as held by the calling thread
    pub fn acquire(&self) {
        self.header.validate(LockKind::Rank);
        track_acquire(&self.header, true);
    }

    /// Forget the marker; the caller must hold it
    pub fn release(&self) {
        self.header.validate(LockKind::Rank);
        track_release(&self.header);
    }

    /// Whether the calling thread holds the marker
    pub fn is_held_by_current_thread(&self) -> bool {
        self.header.validate(LockKind::Rank);
        is_tracked(&self.header)
    }

    /// Destroy the marker; it must not be held
    pub fn destroy(self: Arc<Self>) {
        self.header.validate(LockKind::Rank);
        if is_tracked(&self.header) {
            self.die("destroy of an acquired rank lock");
        }
        self.header.mark_destroyed();
        unregister(self.header.serial());
    }
}

impl LockObject for RankLock {
    fn header(&self) -> &LockHeader {
        &self.header
    }

    fn dump(&self) -> LockDump {
        self.header.dump("")
    }
}

impl Drop for RankLock {
    fn drop(&mut self) {
        unregister(self.header.serial());
        if is_tracked(&self.header) && !std::thread::panicking() {
            track_release(&self.header);
            self.die("drop of an acquired rank lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::ExclusiveLock;
    use crate::fatal::catch_fatal;

    #[test]
    fn test_rank_lock_orders_real_locks() {
        let marker = RankLock::create("rank-marker", 100);
        let below = ExclusiveLock::create("rank-below", 50);
        let above = ExclusiveLock::create("rank-above", 150);

        marker.acquire();
        assert!(marker.is_held_by_current_thread());
        above.acquire();
        above.release();
        assert!(catch_fatal(|| below.acquire()).is_err());
        marker.release();

        below.acquire();
        below.release();
        marker.destroy();
    }

    #[test]
    fn test_drop_while_held_fatal() {
        let marker = RankLock::create("rank-drop-held", 0x40);
        marker.acquire();
        let report = catch_fatal(move || drop(marker)).unwrap_err();
        assert!(report.message.contains("drop of an acquired rank lock"));
        assert!(crate::concurrency::held_locks().is_empty());
    }

    #[test]
    fn test_destroy_while_held_fatal() {
        let marker = RankLock::create("rank-held", 3);
        marker.acquire();
        assert!(catch_fatal(|| marker.clone().destroy()).is_err());
        marker.release();
    }
}
