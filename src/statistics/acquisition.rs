//! Acquisition and held-time statistics

use super::basic::BasicStats;
use super::histogram::Histogram;
use super::report::StatsLine;
use super::{settings, ContentionFloors};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicU64, Ordering};

fn new_histogram(type_name: &'static str) -> Histogram {
    let config = settings();
    Histogram::new(type_name, config.histogram_min_value_ns, config.histogram_decades)
}

/// How often and how long a lock was waited for
#[derive(Debug)]
pub struct AcquisitionStats {
    basic: BasicStats,
    attempts: AtomicU64,
    successes: AtomicU64,
    contended_successes: AtomicU64,
    total_contention_ns: AtomicU64,
    histogram: OnceCell<Histogram>,
}

impl AcquisitionStats {
    pub fn new() -> Self {
        Self {
            basic: BasicStats::new("a"),
            attempts: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            contended_successes: AtomicU64::new(0),
            total_contention_ns: AtomicU64::new(0),
            histogram: OnceCell::new(),
        }
    }

    /// Record one acquisition attempt
    ///
    /// `wait_ns` is the time spent blocked; it is only meaningful when
    /// `contended` is set.
    pub fn sample(&self, acquired: bool, contended: bool, wait_ns: u64) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if !acquired {
            return;
        }

        self.successes.fetch_add(1, Ordering::Relaxed);
        if contended {
            self.contended_successes.fetch_add(1, Ordering::Relaxed);
            self.total_contention_ns.fetch_add(wait_ns, Ordering::Relaxed);
        }

        self.basic.sample(wait_ns);
        if let Some(histo) = self.histogram.get() {
            histo.sample(wait_ns);
        }
    }

    pub fn basic(&self) -> &BasicStats {
        &self.basic
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn contended_successes(&self) -> u64 {
        self.contended_successes.load(Ordering::Relaxed)
    }

    pub fn total_contention_ns(&self) -> u64 {
        self.total_contention_ns.load(Ordering::Relaxed)
    }

    /// Contended successes over successes; zero before the first success
    pub fn contention_ratio(&self) -> f64 {
        let successes = self.successes();
        if successes == 0 {
            return 0.0;
        }
        self.contended_successes() as f64 / successes as f64
    }

    /// Decide whether the lock is hot under `floors`
    ///
    /// A lock is hot when its contention ratio exceeds the ratio floor and it
    /// has reached both the success-count and the contended-time floors.
    pub fn kitchen(&self, floors: &ContentionFloors) -> bool {
        self.contention_ratio() > floors.ratio
            && self.successes() >= floors.count
            && self.total_contention_ns() >= floors.duration_ns
    }

    /// Start collecting a histogram of wait times, if not already
    pub fn enable_histogram(&self) -> &Histogram {
        self.histogram.get_or_init(|| new_histogram("a"))
    }

    pub fn histogram(&self) -> Option<&Histogram> {
        self.histogram.get()
    }

    pub(crate) fn report(&self, serial: u64, line: &mut StatsLine<'_>) {
        self.basic.report(serial, line);
        if self.attempts() > 0 {
            line.start(format!("MXUser: ce l={}", serial));
            line.push(&format!("a={}", self.attempts()));
            line.push(&format!("s={}", self.successes()));
            line.push(&format!("c={}", self.contended_successes()));
            line.push(&format!("t={}", self.total_contention_ns()));
            line.finish();
        }
        if let Some(histo) = self.histogram.get() {
            histo.report(serial, line);
        }
    }
}

impl Default for AcquisitionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// How long a lock was held
#[derive(Debug)]
pub struct HeldStats {
    basic: BasicStats,
    histogram: OnceCell<Histogram>,
}

impl HeldStats {
    pub fn new() -> Self {
        Self {
            basic: BasicStats::new("h"),
            histogram: OnceCell::new(),
        }
    }

    pub fn sample(&self, held_ns: u64) {
        self.basic.sample(held_ns);
        if let Some(histo) = self.histogram.get() {
            histo.sample(held_ns);
        }
    }

    pub fn basic(&self) -> &BasicStats {
        &self.basic
    }

    pub fn enable_histogram(&self) -> &Histogram {
        self.histogram.get_or_init(|| new_histogram("h"))
    }

    pub fn histogram(&self) -> Option<&Histogram> {
        self.histogram.get()
    }

    pub(crate) fn report(&self, serial: u64, line: &mut StatsLine<'_>) {
        self.basic.report(serial, line);
        if let Some(histo) = self.histogram.get() {
            histo.report(serial, line);
        }
    }
}

impl Default for HeldStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floors(ratio: f64, count: u64, duration_ns: u64) -> ContentionFloors {
        ContentionFloors {
            ratio,
            count,
            duration_ns,
        }
    }

    #[test]
    fn test_sample_counts() {
        let stats = AcquisitionStats::new();
        stats.sample(true, false, 0);
        stats.sample(true, true, 500);
        stats.sample(false, false, 0);

        assert_eq!(stats.attempts(), 3);
        assert_eq!(stats.successes(), 2);
        assert_eq!(stats.contended_successes(), 1);
        assert_eq!(stats.total_contention_ns(), 500);
        assert_eq!(stats.basic().count(), 2);
        assert!((stats.contention_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_kitchen_floors() {
        let stats = AcquisitionStats::new();
        for _ in 0..10 {
            stats.sample(true, true, 1_000);
        }

        assert!(stats.kitchen(&floors(0.5, 10, 10_000)));
        // Ratio must strictly exceed the floor
        assert!(!stats.kitchen(&floors(1.0, 10, 10_000)));
        assert!(!stats.kitchen(&floors(0.5, 11, 10_000)));
        assert!(!stats.kitchen(&floors(0.5, 10, 10_001)));
    }

    #[test]
    fn test_uncontended_lock_never_hot() {
        let stats = AcquisitionStats::new();
        for _ in 0..1000 {
            stats.sample(true, false, 0);
        }
        assert_eq!(stats.contention_ratio(), 0.0);
        assert!(!stats.kitchen(&floors(0.0, 0, 0)));
    }

    #[test]
    fn test_histogram_only_after_enable() {
        let stats = AcquisitionStats::new();
        stats.sample(true, true, 5_000);
        assert!(stats.histogram().is_none());

        stats.enable_histogram();
        stats.sample(true, true, 5_000);
        assert_eq!(stats.histogram().map(|h| h.total()), Some(1));

        let held = HeldStats::new();
        held.sample(10);
        held.enable_histogram();
        held.sample(10);
        assert_eq!(held.basic().count(), 2);
        assert_eq!(held.histogram().map(|h| h.total()), Some(1));
    }
}
