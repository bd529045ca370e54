//! Running count/min/max/mean/deviation of a duration
//!
//! Samples arrive from many threads at once; every field is an atomic so the
//! sampler never takes a lock. A reader may see a sample half applied (count
//! bumped, sum not yet), which only skews a single report.

use super::report::StatsLine;
use crate::thread::atomic_ext::{atomic_add_f64, AtomicExt};
use std::sync::atomic::{AtomicU64, Ordering};

/// Incrementally maintained statistics of a duration in nanoseconds
#[derive(Debug)]
pub struct BasicStats {
    type_name: &'static str,
    count: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
    sum: AtomicU64,
    sum_sq: AtomicU64,
}

/// Point-in-time view of a [`BasicStats`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BasicSnapshot {
    pub count: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub std_dev: f64,
}

impl BasicStats {
    /// Create empty statistics; `type_name` tags the report lines ("a", "h")
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            count: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
            sum: AtomicU64::new(0f64.to_bits()),
            sum_sq: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Add one sample
    #[inline]
    pub fn sample(&self, value: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.min.atomic_minimize(value, Ordering::Relaxed);
        self.max.atomic_maximize(value, Ordering::Relaxed);
        let v = value as f64;
        atomic_add_f64(&self.sum, v, Ordering::Relaxed);
        atomic_add_f64(&self.sum_sq, v * v, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> BasicSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return BasicSnapshot {
                count: 0,
                min: 0,
                max: 0,
                mean: 0.0,
                std_dev: 0.0,
            };
        }

        let n = count as f64;
        let sum = f64::from_bits(self.sum.load(Ordering::Relaxed));
        let sum_sq = f64::from_bits(self.sum_sq.load(Ordering::Relaxed));
        let mean = sum / n;
        let variance = (sum_sq / n - mean * mean).max(0.0);

        BasicSnapshot {
            count,
            min: self.min.load(Ordering::Relaxed),
            max: self.max.load(Ordering::Relaxed),
            mean,
            std_dev: variance.sqrt(),
        }
    }

    /// Emit `MXUser: e l=<serial> t=<type> c= min= max= mean= sd=`
    pub(crate) fn report(&self, serial: u64, line: &mut StatsLine<'_>) {
        let snap = self.snapshot();
        if snap.count == 0 {
            return;
        }
        line.start(format!("MXUser: e l={} t={}", serial, self.type_name));
        line.push(&format!("c={}", snap.count));
        line.push(&format!("min={}", snap.min));
        line.push(&format!("max={}", snap.max));
        line.push(&format!("mean={}", snap.mean as u64));
        line.push(&format!("sd={}", snap.std_dev as u64));
        line.finish();
    }
}
