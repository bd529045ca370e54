//! Reusable barrier
//!
//! Two contexts alternate. Arrivals count into the current context; the
//! arrival that completes it flips the current context to the other one and
//! wakes everybody waiting on the completed one. No reset is needed between
//! rounds.

use super::condvar::ConditionVariable;
use super::excl_lock::ExclusiveLock;
use super::header::{LockDump, LockHeader, LockKind, LockObject, Rank};
use super::registry::{register, unregister, SingletonCell};
use crate::mx_verify;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

struct BarrierContext {
    count: AtomicU32,
    cond_var: Arc<ConditionVariable>,
}

/// A reusable rendezvous point for a fixed number of threads
pub struct Barrier {
    header: LockHeader,
    lock: Arc<ExclusiveLock>,
    config_count: u32,
    cur_context: AtomicUsize,
    contexts: [BarrierContext; 2],
}

impl Barrier {
    /// Create and register a barrier for `count` threads
    ///
    /// A count of zero is a fatal misuse.
    pub fn create(name: &str, rank: Rank, count: u32) -> Arc<Self> {
        let header = LockHeader::new(LockKind::Barrier, name, rank);
        if count == 0 {
            crate::fatal::fatal(Some(header.dump("count=0")), format!("barrier {} created with a count of zero", name));
        }

        let lock = ExclusiveLock::create(&format!("{}.lock", name), rank);
        let contexts = [
            BarrierContext {
                count: AtomicU32::new(0),
                cond_var: lock.create_cond_var(&format!("{}.cv0", name)),
            },
            BarrierContext {
                count: AtomicU32::new(0),
                cond_var: lock.create_cond_var(&format!("{}.cv1", name)),
            },
        ];

        let barrier = Arc::new(Self {
            header,
            lock,
            config_count: count,
            cur_context: AtomicUsize::new(0),
            contexts,
        });
        register(&barrier);
        barrier
    }

    /// The barrier stored in `cell`, created on first use
    pub fn create_singleton(cell: &SingletonCell<Barrier>, name: &str, rank: Rank, count: u32) -> Arc<Self> {
        cell.get_or_init(|| Self::create(name, rank, count))
    }

    /// Name given at creation
    pub fn name(&self) -> &str {
        self.header.name()
    }

    /// Number of threads each round waits for
    pub fn count(&self) -> u32 {
        self.config_count
    }

    /// Block until `count` threads have entered
    pub fn enter(&self) {
        self.header.validate(LockKind::Barrier);
        self.lock.acquire();

        let context = self.cur_context.load(Ordering::Relaxed);
        let ctx = &self.contexts[context];
        let arrived = ctx.count.fetch_add(1, Ordering::Relaxed) + 1;

        if arrived == self.config_count {
            let next = (context + 1) & 1;
            mx_verify!(
                self.contexts[next].count.load(Ordering::Relaxed) == 0,
                "barrier {} reused while the previous round is draining",
                self.header.name()
            );
            self.cur_context.store(next, Ordering::Relaxed);
            ctx.cond_var.broadcast();
        } else {
            while self.cur_context.load(Ordering::Relaxed) == context {
                ctx.cond_var.wait(&*self.lock);
            }
        }

        ctx.count.fetch_sub(1, Ordering::Relaxed);
        self.lock.release();
    }

    /// Destroy the barrier; no thread may be inside it
    pub fn destroy(self: Arc<Self>) {
        self.header.validate(LockKind::Barrier);
        let in_use = self
            .contexts
            .iter()
            .any(|ctx| ctx.count.load(Ordering::Acquire) != 0);
        if in_use {
            self.die("destroy of a barrier in use");
        }
        self.header.mark_destroyed();
        unregister(self.header.serial());
        for ctx in &self.contexts {
            ctx.cond_var.clone().destroy();
        }
        self.lock.clone().destroy();
    }
}

impl LockObject for Barrier {
    fn header(&self) -> &LockHeader {
        &self.header
    }

    fn dump(&self) -> LockDump {
        self.header.dump(format!(
            "count={} current={} waiting={}/{}",
            self.config_count,
            self.cur_context.load(Ordering::Relaxed),
            self.contexts[0].count.load(Ordering::Relaxed),
            self.contexts[1].count.load(Ordering::Relaxed)
        ))
    }
}

impl Drop for Barrier {
    fn drop(&mut self) {
        unregister(self.header.serial());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fatal::catch_fatal;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_nobody_leaves_early_and_reuse() {
        const N: usize = 4;
        let barrier = Barrier::create("barrier-rounds", 0, N as u32);
        let arrived = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..N)
            .map(|_| {
                let (barrier, arrived) = (barrier.clone(), arrived.clone());
                thread::spawn(move || {
                    for round in 1..=3u32 {
                        arrived.fetch_add(1, Ordering::SeqCst);
                        barrier.enter();
                        assert!(arrived.load(Ordering::SeqCst) >= round * N as u32);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(arrived.load(Ordering::SeqCst), 3 * N as u32);
        barrier.destroy();
    }

    #[test]
    fn test_single_thread_barrier() {
        let barrier = Barrier::create("barrier-one", 0, 1);
        barrier.enter();
        barrier.enter();
        assert_eq!(barrier.count(), 1);
    }

    #[test]
    fn test_zero_count_fatal() {
        let report = catch_fatal(|| Barrier::create("barrier-zero", 0, 0))
            .map(|_| ())
            .unwrap_err();
        assert!(report.message.contains("count of zero"));
    }

    #[test]
    fn test_destroy_in_use_fatal() {
        let barrier = Barrier::create("barrier-busy", 0, 2);
        let waiter = {
            let barrier = barrier.clone();
            thread::spawn(move || barrier.enter())
        };
        while barrier.contexts[0].count.load(Ordering::Acquire) == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        let report = catch_fatal(|| barrier.clone().destroy()).unwrap_err();
        assert!(report.message.contains("destroy of a barrier in use"));

        barrier.enter();
        waiter.join().unwrap();
    }
}
