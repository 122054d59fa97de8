//! Construction-time loader settings.

use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::error::ConfigError;

/// Default batch window; long enough to gather sibling resolvers scheduled in the same tick.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(1);

/// Default maximum number of unique keys per batch.
pub const DEFAULT_CAPACITY: usize = 100;

/// # LoaderConfig
///
/// The two knobs of the window scheduler. Both are fixed once a loader is built.
///
/// Deserializes from any serde format, with `window` written as a
/// human-readable duration:
///
/// ```
/// # use coalesce::LoaderConfig;
/// # use std::time::Duration;
/// let config: LoaderConfig = serde_json::from_str(r#"{"window": "5ms", "capacity": 50}"#).unwrap();
/// assert_eq!(config.window, Duration::from_millis(5));
/// assert_eq!(config.capacity, 50);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Longest a batch waits after its first key before dispatching.
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Unique keys that force an immediate dispatch.
    pub capacity: usize,
}

impl LoaderConfig {
    /// Builds a validated configuration.
    pub fn new(window: Duration, capacity: usize) -> Result<Self, ConfigError> {
        let config = Self { window, capacity };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the scheduler relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.window.is_zero() {
            return Err(ConfigError::ZeroWindow);
        }
        Ok(())
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            capacity: DEFAULT_CAPACITY,
        }
    }
}
