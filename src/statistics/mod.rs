//! Lock statistics
//!
//! Optional, per-primitive sampling of how long acquisitions waited, how often
//! they were contended and how long locks were held, plus log-scale
//! histograms for locks that turn out to be hot. Everything here is updated
//! with atomics; sampling never takes a lock of its own.
//!
//! Process-wide settings (defaults for new locks, contention floors, histogram
//! shape) come from [`StatsConfig`] via [`crate::init`]. The floors may be
//! adjusted at any time afterwards.

pub mod acquisition;
pub mod basic;
pub mod histogram;
pub mod lock_stats;
pub mod report;
pub mod timing;

pub use acquisition::{AcquisitionStats, HeldStats};
pub use basic::{BasicSnapshot, BasicStats};
pub use histogram::Histogram;
pub use lock_stats::LockStats;
pub use report::{register_stats_sink, stats_sink_registered, StatsLine, StatsSink};
pub use timing::{elapsed_ns, now_ns};

use crate::config::{Config, StatsConfig};
use crate::error::{MxUserError, Result};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::time::Duration;

static SETTINGS: Lazy<RwLock<StatsConfig>> = Lazy::new(|| RwLock::new(StatsConfig::default()));

/// Thresholds below which a lock is never considered hot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContentionFloors {
    /// Contended/successful ratio that must be exceeded
    pub ratio: f64,
    /// Minimum successful acquisitions
    pub count: u64,
    /// Minimum total contended time, nanoseconds
    pub duration_ns: u64,
}

/// Validate and install statistics settings for locks created from now on
pub fn install(config: &StatsConfig) -> Result<()> {
    config.validate()?;
    *SETTINGS.write() = config.clone();
    Ok(())
}

/// Current statistics settings
pub fn settings() -> StatsConfig {
    SETTINGS.read().clone()
}

/// Current contention floors
pub fn contention_floors() -> ContentionFloors {
    let settings = SETTINGS.read();
    ContentionFloors {
        ratio: settings.contention_ratio_floor,
        count: settings.contention_count_floor,
        duration_ns: settings.contention_duration_floor_ns,
    }
}

/// Set the contention ratio a lock must exceed to be flagged hot
pub fn set_contention_ratio_floor(ratio: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&ratio) {
        return Err(MxUserError::configuration(format!(
            "contention ratio floor {} is outside 0.0..=1.0",
            ratio
        )));
    }
    SETTINGS.write().contention_ratio_floor = ratio;
    Ok(())
}

/// Set the number of successful acquisitions required before a lock can be hot
pub fn set_contention_count_floor(count: u64) {
    SETTINGS.write().contention_count_floor = count;
}

/// Set the total contended time required before a lock can be hot
pub fn set_contention_duration_floor(duration: Duration) {
    SETTINGS.write().contention_duration_floor_ns = duration.as_nanos().min(u64::MAX as u128) as u64;
}
