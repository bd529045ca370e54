//! Primitive backend selection.

use super::{load_json, parse_env_bool, save_json, Config};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Backend knobs for newly created primitives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Use the native reader-writer lock. When false, read-write locks fall
    /// back to single-owner semantics on the reentrant core.
    pub native_rwlock: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { native_rwlock: true }
    }
}

impl Config for LockConfig {
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn from_env_with_prefix(prefix: &str) -> Result<Self> {
        let mut config = Self::default();
        config.native_rwlock = parse_env_bool(&format!("{}NATIVE_RWLOCK", prefix), config.native_rwlock);
        config.validate()?;
        Ok(config)
    }

    fn performance_preset() -> Self {
        Self { native_rwlock: true }
    }

    fn memory_preset() -> Self {
        Self { native_rwlock: true }
    }

    fn realtime_preset() -> Self {
        Self { native_rwlock: true }
    }

    fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        save_json(self, "lock", path)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = load_json("lock", path)?;
        config.validate()?;
        Ok(config)
    }
}
