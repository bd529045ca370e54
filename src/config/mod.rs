//! Configuration for mxuser
//!
//! The library never reads configuration on its own critical paths. A host
//! resolves the tunables once (from defaults, presets, environment variables
//! or a JSON file) and hands them to [`crate::init`].
//!
//! # Configuration types
//!
//! - [`StatsConfig`]: statistics defaults, contention floors and histogram shape
//! - [`LockConfig`]: backend selection for the primitives
//!
//! # Presets
//!
//! ```rust
//! use mxuser::config::{Config, StatsConfig};
//!
//! // Nothing sampled: lowest overhead
//! let config = StatsConfig::performance_preset();
//! assert!(!config.enabled_by_default);
//!
//! // Acquisition and held times sampled on every lock
//! let config = StatsConfig::realtime_preset();
//! assert!(config.track_held_times);
//! ```
//!
//! # Environment initialization
//!
//! ```rust
//! use mxuser::config::{Config, StatsConfig};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Reads MXUSER_STATS_ENABLED, MXUSER_STATS_RATIO_FLOOR, ...
//! let config = StatsConfig::from_env()?;
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use std::env;
use std::fmt;
use std::path::Path;

pub mod lock;
pub mod stats;


pub use lock::LockConfig;
pub use stats::StatsConfig;

/// Common configuration trait providing validation, environment initialization,
/// and preset management functionality.
pub trait Config: Clone + fmt::Debug {
    /// Validate the configuration for correctness and consistency.
    fn validate(&self) -> Result<()>;

    /// Initialize configuration from environment variables with the
    /// `MXUSER_` prefix.
    fn from_env() -> Result<Self>
    where
        Self: Default,
    {
        Self::from_env_with_prefix("MXUSER_")
    }

    /// Initialize configuration from environment variables with a custom prefix.
    fn from_env_with_prefix(prefix: &str) -> Result<Self>
    where
        Self: Default;

    /// Lowest overhead: nothing optional is switched on.
    fn performance_preset() -> Self;

    /// Smallest footprint for the optional statistics blocks.
    fn memory_preset() -> Self;

    /// Full observability, for tracking down latency problems.
    fn realtime_preset() -> Self;

    /// The defaults.
    fn balanced_preset() -> Self
    where
        Self: Default,
    {
        Self::default()
    }

    /// Save configuration to a JSON file.
    fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()>;

    /// Load and validate configuration from a JSON file.
    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self>;
}

/// Configuration validation error details.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field that failed validation
    pub field: String,
    /// The invalid value
    pub value: String,
    /// Description of why the value is invalid
    pub reason: String,
}

impl ValidationError {
    /// Create a new validation error.
    pub fn new(field: &str, value: impl fmt::Display, reason: &str) -> Self {
        Self {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid configuration for field '{}': value '{}' is invalid ({})",
            self.field, self.value, self.reason
        )
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for crate::error::MxUserError {
    fn from(err: ValidationError) -> Self {
        crate::error::MxUserError::configuration(err.to_string())
    }
}

/// Parse an environment variable, falling back to `default` when it is
/// unset or unparsable.
pub fn parse_env_var<T>(var_name: &str, default: T) -> T
where
    T: std::str::FromStr + Clone,
{
    env::var(var_name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Parse a boolean environment variable.
///
/// Accepts "true", "1", "yes", "on" (case-insensitive) as true,
/// everything else as false.
pub fn parse_env_bool(var_name: &str, default: bool) -> bool {
    env::var(var_name)
        .ok()
        .map(|s| {
            let s = s.to_lowercase();
            matches!(s.as_str(), "true" | "1" | "yes" | "on")
        })
        .unwrap_or(default)
}

pub(crate) fn save_json<T: serde::Serialize, P: AsRef<Path>>(value: &T, what: &str, path: P) -> Result<()> {
    let serialized = serde_json::to_string_pretty(value).map_err(|e| {
        crate::error::MxUserError::configuration(format!("Failed to serialize {} config: {}", what, e))
    })?;
    std::fs::write(path, serialized)?;
    Ok(())
}

pub(crate) fn load_json<T: serde::de::DeserializeOwned, P: AsRef<Path>>(what: &str, path: P) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| {
        crate::error::MxUserError::configuration(format!("Failed to parse {} config file: {}", what, e))
    })
}
