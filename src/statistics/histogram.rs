//! Log-scale histogram of durations
//!
//! A histogram covers `[min_value, min_value * 10^decades)` with 100 bins per
//! decade. The bin of a sample is `floor(100 * log10(value / min_value))`,
//! computed in 16.16 fixed point: an integer log2 refined by repeated
//! squaring, scaled to log10 by `19729 / 65536`. That constant is a hair above
//! log10(2), so a value sitting exactly on a decade edge can land one bin
//! high. Recorded histograms depend on these boundaries; keep them.

use super::report::StatsLine;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bins per decade
pub const BINS_PER_DECADE: u32 = 100;

const FRACTION_BITS: u32 = 16;

/// log10(2) in 0.16 fixed point, rounded up
const LOG10_2_FIXED: u64 = 19729;

/// log2(value) in 16.16 fixed point; `value` must be non-zero
fn log2_fixed(value: u64) -> u64 {
    debug_assert!(value != 0);
    let int_part = 63 - value.leading_zeros();

    // Mantissa normalized into [2^31, 2^32), i.e. [1, 2) in 1.31 fixed point
    let mut x = if int_part >= 31 {
        value >> (int_part - 31)
    } else {
        value << (31 - int_part)
    };

    let mut frac = 0u64;
    for bit in (0..FRACTION_BITS).rev() {
        x = (x * x) >> 31;
        if x >= 1 << 32 {
            x >>= 1;
            frac |= 1 << bit;
        }
    }

    ((int_part as u64) << FRACTION_BITS) | frac
}

/// log10(value) in 16.16 fixed point; `value` must be non-zero
fn log10_fixed(value: u64) -> u64 {
    (log2_fixed(value) * LOG10_2_FIXED) >> FRACTION_BITS
}

/// Fixed-bin log-scale histogram, safe to sample from many threads
#[derive(Debug)]
pub struct Histogram {
    type_name: &'static str,
    min_value: u64,
    decades: u32,
    min_log: u64,
    total: AtomicU64,
    bins: Box<[AtomicU64]>,
}

impl Histogram {
    /// Create an empty histogram
    ///
    /// `min_value` is raised to 1 and `decades` to at least 1.
    pub fn new(type_name: &'static str, min_value: u64, decades: u32) -> Self {
        let min_value = min_value.max(1);
        let decades = decades.max(1);
        let bins = (0..BINS_PER_DECADE * decades)
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            type_name,
            min_value,
            decades,
            min_log: log10_fixed(min_value),
            total: AtomicU64::new(0),
            bins,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn min_value(&self) -> u64 {
        self.min_value
    }

    pub fn decades(&self) -> u32 {
        self.decades
    }

    pub fn num_bins(&self) -> usize {
        self.bins.len()
    }

    /// Bin a value falls into; out-of-range values clamp to the first or last bin
    pub fn bin_index(&self, value: u64) -> usize {
        if value <= self.min_value {
            return 0;
        }
        let delta = log10_fixed(value).saturating_sub(self.min_log);
        let index = ((delta * BINS_PER_DECADE as u64) >> FRACTION_BITS) as usize;
        index.min(self.bins.len() - 1)
    }

    /// Record one sample
    #[inline]
    pub fn sample(&self, value: u64) {
        let index = self.bin_index(value);
        self.bins[index].fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of samples recorded
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn bin_count(&self, index: usize) -> u64 {
        self.bins
            .get(index)
            .map(|b| b.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Non-empty bins as `(index, count)`
    pub fn non_empty_bins(&self) -> Vec<(usize, u64)> {
        self.bins
            .iter()
            .enumerate()
            .filter_map(|(i, b)| {
                let count = b.load(Ordering::Relaxed);
                (count > 0).then_some((i, count))
            })
            .collect()
    }

    /// Emit `MXUser: h l=<serial> t=<type> min= decades= n=` followed by
    /// `<bin>-<count>` for every non-empty bin
    pub(crate) fn report(&self, serial: u64, line: &mut StatsLine<'_>) {
        let total = self.total();
        if total == 0 {
            return;
        }
        line.start(format!(
            "MXUser: h l={} t={} min={} decades={}",
            serial, self.type_name, self.min_value, self.decades
        ));
        line.push(&format!("n={}", total));
        for (index, count) in self.non_empty_bins() {
            line.push(&format!("{}-{}", index, count));
        }
        line.finish();
    }
}
