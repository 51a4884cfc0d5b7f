//! Global configuration model for the hostbox backend.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{HostboxError, Result};

/// Root configuration for a hostbox backend.
///
/// Durations are stored as whole seconds in the JSON form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostboxConfig {
    /// Directory holding one subdirectory per container.
    pub containers_dir: PathBuf,
    /// Maximum number of simultaneously active containers.
    pub max_active_containers: usize,
    /// Grace time given to containers that do not request one.
    #[serde(with = "duration_secs")]
    pub default_grace_time: Duration,
    /// How long a polite stop waits before killing processes.
    #[serde(with = "duration_secs")]
    pub stop_timeout: Duration,
}

impl Default for HostboxConfig {
    fn default() -> Self {
        Self {
            containers_dir: constants::default_containers_dir(),
            max_active_containers: constants::DEFAULT_MAX_ACTIVE_CONTAINERS,
            default_grace_time: constants::DEFAULT_GRACE_TIME,
            stop_timeout: constants::DEFAULT_STOP_TIMEOUT,
        }
    }
}

impl HostboxConfig {
    /// Returns the default configuration rooted at `containers_dir`.
    #[must_use]
    pub fn with_containers_dir(containers_dir: impl Into<PathBuf>) -> Self {
        Self {
            containers_dir: containers_dir.into(),
            ..Self::default()
        }
    }

    /// Loads a configuration from a JSON file. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// sets a zero container ceiling.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| HostboxError::io(path, e))?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), ?config, "loaded configuration");
        Ok(config)
    }

    /// Checks invariants that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`HostboxError::Config`] if `max_active_containers` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_active_containers == 0 {
            return Err(HostboxError::Config {
                message: "max_active_containers must be at least 1".into(),
            });
        }
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
