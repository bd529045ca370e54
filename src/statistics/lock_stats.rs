//! Per-lock statistics block
//!
//! Every primitive carries a [`LockStats`]. The acquisition and held-time
//! blocks are allocated the first time they are enabled and then kept for the
//! life of the lock, so disabling only stops sampling.

use super::acquisition::{AcquisitionStats, HeldStats};
use super::report::{with_stats_line, StatsLine};
use super::{contention_floors, settings};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct LockStats {
    acquisition: OnceCell<AcquisitionStats>,
    held: OnceCell<HeldStats>,
    acquisition_on: AtomicBool,
    held_on: AtomicBool,
    hot: AtomicBool,
}

impl LockStats {
    /// Statistics block honouring the process defaults
    pub fn new() -> Self {
        let stats = Self::default();
        let config = settings();
        if config.enabled_by_default {
            stats.enable(config.track_held_times);
        }
        stats
    }

    /// Block with sampling off regardless of the process defaults
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Start sampling acquisitions, and held times if `track_held`
    pub fn enable(&self, track_held: bool) {
        self.acquisition.get_or_init(AcquisitionStats::new);
        self.acquisition_on.store(true, Ordering::Release);
        if track_held {
            self.held.get_or_init(HeldStats::new);
            self.held_on.store(true, Ordering::Release);
        }
    }

    /// Stop sampling; collected data is kept
    pub fn disable(&self) {
        self.acquisition_on.store(false, Ordering::Release);
        self.held_on.store(false, Ordering::Release);
    }

    #[inline]
    pub fn measure_acquisition(&self) -> bool {
        self.acquisition_on.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn track_held(&self) -> bool {
        self.held_on.load(Ordering::Relaxed)
    }

    pub fn is_hot(&self) -> bool {
        self.hot.load(Ordering::Relaxed)
    }

    pub fn acquisition(&self) -> Option<&AcquisitionStats> {
        self.acquisition.get()
    }

    pub fn held(&self) -> Option<&HeldStats> {
        self.held.get()
    }

    #[inline]
    pub fn record_acquisition(&self, acquired: bool, contended: bool, wait_ns: u64) {
        if let Some(acq) = self.acquisition.get() {
            acq.sample(acquired, contended, wait_ns);
        }
    }

    #[inline]
    pub fn record_held(&self, held_ns: u64) {
        if let Some(held) = self.held.get() {
            held.sample(held_ns);
        }
    }

    /// Epoch callback: run the hot-lock heuristic, then emit this lock's lines
    ///
    /// Returns true if the lock went hot during this call.
    pub fn report(&self, name: &str, serial: u64) -> bool {
        let Some(acq) = self.acquisition.get() else {
            return false;
        };

        let went_hot = !self.is_hot() && acq.kitchen(&contention_floors()) && !self.hot.swap(true, Ordering::AcqRel);
        if went_hot {
            let ratio = acq.contention_ratio();
            log::info!("MXUser: HOT lock {} (l={}) contention ratio {:.3}", name, serial, ratio);
            acq.enable_histogram();
            if let Some(held) = self.held.get() {
                held.enable_histogram();
            }
            with_stats_line(|line| {
                line.start(format!("MXUser: HOT l={}", serial));
                line.push(&format!("n={}", name));
                line.push(&format!("r={:.3}", ratio));
                line.finish();
            });
        }

        with_stats_line(|line| self.write_lines(serial, line));
        went_hot
    }

    fn write_lines(&self, serial: u64, line: &mut StatsLine<'_>) {
        if let Some(acq) = self.acquisition.get() {
            acq.report(serial, line);
        }
        if let Some(held) = self.held.get() {
            held.report(serial, line);
        }
    }
}
