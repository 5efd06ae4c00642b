//! World model configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{WorldModelError, WorldResult};

/// Tuning knobs for a [`WorldModel`](crate::WorldModel).
///
/// Missing fields take their defaults, so `{}` is a valid configuration.
///
/// ```
/// use worldmodel::WorldModelConfig;
///
/// let config = WorldModelConfig::from_json_str(r#"{ "age_to_unload_keyframes": 30.0 }"#).unwrap();
/// assert_eq!(config.spin_period_ms, 1000);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorldModelConfig {
    /// Seconds an entity may stay idle before the eviction tick unloads it.
    pub age_to_unload_keyframes: f64,
    /// Period of the background eviction tick, in milliseconds.
    pub spin_period_ms: u64,
    /// Directory for unloaded payloads. `None` keeps them in memory.
    pub storage_dir: Option<PathBuf>,
    /// Whether the directory store fsyncs each payload file.
    pub sync_on_write: bool,
}

impl Default for WorldModelConfig {
    fn default() -> Self {
        Self {
            age_to_unload_keyframes: 15.0,
            spin_period_ms: 1000,
            storage_dir: None,
            sync_on_write: true,
        }
    }
}

impl WorldModelConfig {
    /// Parses and validates a JSON configuration block.
    ///
    /// # Errors
    /// [`WorldModelError::InvalidConfig`] on malformed JSON or out-of-range
    /// values.
    pub fn from_json_str(json: &str) -> WorldResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| WorldModelError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    /// [`WorldModelError::InvalidConfig`] if the idle age is not a positive
    /// finite number or the spin period is zero.
    pub fn validate(&self) -> WorldResult<()> {
        if !self.age_to_unload_keyframes.is_finite() || self.age_to_unload_keyframes <= 0.0 {
            return Err(WorldModelError::InvalidConfig {
                reason: format!(
                    "age_to_unload_keyframes must be a positive number of seconds, got {}",
                    self.age_to_unload_keyframes
                ),
            });
        }
        if self.spin_period_ms == 0 {
            return Err(WorldModelError::InvalidConfig {
                reason: "spin_period_ms must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Idle age after which an entity is reported stale.
    #[must_use]
    pub fn max_idle_age(&self) -> Duration {
        Duration::try_from_secs_f64(self.age_to_unload_keyframes).unwrap_or(Duration::MAX)
    }

    /// Period of the eviction tick.
    #[must_use]
    pub const fn spin_period(&self) -> Duration {
        Duration::from_millis(self.spin_period_ms)
    }
}
