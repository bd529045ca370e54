//! Statistics tunables.

use super::{load_json, parse_env_bool, parse_env_var, save_json, Config, ValidationError};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Largest number of decades a histogram may span
pub const MAX_HISTOGRAM_DECADES: u32 = 9;

/// Pre-resolved statistics knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Newly created locks sample acquisition times
    pub enabled_by_default: bool,
    /// Newly created locks with statistics also sample held times
    pub track_held_times: bool,
    /// Contended/successful ratio a lock must exceed to be considered hot
    pub contention_ratio_floor: f64,
    /// Minimum successful acquisitions before a lock can be hot
    pub contention_count_floor: u64,
    /// Minimum total contended time (ns) before a lock can be hot
    pub contention_duration_floor_ns: u64,
    /// Lower edge of histogram bucket 0, in nanoseconds
    pub histogram_min_value_ns: u64,
    /// Number of decades a histogram covers (100 buckets each)
    pub histogram_decades: u32,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled_by_default: false,
            track_held_times: false,
            contention_ratio_floor: 0.15,
            contention_count_floor: 100,
            contention_duration_floor_ns: 1_000_000,
            histogram_min_value_ns: 1_000,
            histogram_decades: 7,
        }
    }
}

impl Config for StatsConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.contention_ratio_floor) {
            return Err(ValidationError::new(
                "contention_ratio_floor",
                self.contention_ratio_floor,
                "must be within 0.0..=1.0",
            )
            .into());
        }
        if self.histogram_min_value_ns == 0 {
            return Err(ValidationError::new("histogram_min_value_ns", 0, "must be greater than 0").into());
        }
        if self.histogram_decades == 0 || self.histogram_decades > MAX_HISTOGRAM_DECADES {
            return Err(ValidationError::new(
                "histogram_decades",
                self.histogram_decades,
                "must be within 1..=9",
            )
            .into());
        }
        if self
            .histogram_min_value_ns
            .checked_mul(10u64.pow(self.histogram_decades))
            .is_none()
        {
            return Err(ValidationError::new(
                "histogram_min_value_ns",
                self.histogram_min_value_ns,
                "upper histogram edge overflows u64",
            )
            .into());
        }
        if self.track_held_times && !self.enabled_by_default {
            log::debug!("track_held_times has no effect while statistics are disabled by default");
        }
        Ok(())
    }

    fn from_env_with_prefix(prefix: &str) -> Result<Self> {
        let mut config = Self::default();
        config.enabled_by_default =
            parse_env_bool(&format!("{}STATS_ENABLED", prefix), config.enabled_by_default);
        config.track_held_times =
            parse_env_bool(&format!("{}STATS_HELD_TIMES", prefix), config.track_held_times);
        config.contention_ratio_floor =
            parse_env_var(&format!("{}STATS_RATIO_FLOOR", prefix), config.contention_ratio_floor);
        config.contention_count_floor =
            parse_env_var(&format!("{}STATS_COUNT_FLOOR", prefix), config.contention_count_floor);
        config.contention_duration_floor_ns = parse_env_var(
            &format!("{}STATS_DURATION_FLOOR_NS", prefix),
            config.contention_duration_floor_ns,
        );
        config.histogram_min_value_ns =
            parse_env_var(&format!("{}STATS_HISTO_MIN_NS", prefix), config.histogram_min_value_ns);
        config.histogram_decades =
            parse_env_var(&format!("{}STATS_HISTO_DECADES", prefix), config.histogram_decades);
        config.validate()?;
        Ok(config)
    }

    fn performance_preset() -> Self {
        Self {
            enabled_by_default: false,
            track_held_times: false,
            ..Self::default()
        }
    }

    fn memory_preset() -> Self {
        Self {
            enabled_by_default: false,
            track_held_times: false,
            histogram_decades: 4,
            ..Self::default()
        }
    }

    fn realtime_preset() -> Self {
        Self {
            enabled_by_default: true,
            track_held_times: true,
            contention_ratio_floor: 0.05,
            contention_count_floor: 10,
            contention_duration_floor_ns: 100_000,
            histogram_min_value_ns: 100,
            histogram_decades: 8,
        }
    }

    fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_json(self, "stats", path)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = load_json("stats", path)?;
        config.validate()?;
        Ok(config)
    }
}
