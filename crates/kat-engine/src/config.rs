//! Engine configuration
//!
//! Loaded from TOML; durations are written in human form (`"2s"`, `"5m"`).
//!
//! ```toml
//! poll_interval = "1s"
//! default_timeout = "3m"
//! max_output_bytes = 32768
//! diagnostics_timeout = "10s"
//!
//! [log]
//! filter = "kat_engine=debug"
//! format = "json"
//! ```

use crate::diagnostics::{DEFAULT_DIAGNOSTICS_TIMEOUT, DEFAULT_MAX_OUTPUT_BYTES};
use crate::error::ConfigError;
use crate::poller::DEFAULT_POLL_INTERVAL;
use kat_scenario::DEFAULT_TIMEOUT;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Engine settings shared by every scenario run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Interval between convergence checks
    #[serde(with = "human_duration")]
    pub poll_interval: Duration,

    /// Convergence timeout for scenarios that set none
    #[serde(with = "human_duration")]
    pub default_timeout: Duration,

    /// Cap on captured output per agent in diagnostics; 0 keeps everything
    pub max_output_bytes: usize,

    /// Bound on gathering diagnostics for one failed run
    #[serde(with = "human_duration")]
    pub diagnostics_timeout: Duration,

    /// Logging
    pub log: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            default_timeout: DEFAULT_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            diagnostics_timeout: DEFAULT_DIAGNOSTICS_TIMEOUT,
            log: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// With poll interval
    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// With default timeout
    #[inline]
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// With per-agent output cap
    #[inline]
    #[must_use]
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// With diagnostics time limit
    #[inline]
    #[must_use]
    pub fn with_diagnostics_timeout(mut self, limit: Duration) -> Self {
        self.diagnostics_timeout = limit;
        self
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// `ConfigError::Parse` for malformed TOML or unknown keys,
    /// `ConfigError::Invalid` for out-of-range values
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// `ConfigError::Io` if the file cannot be read, otherwise as
    /// [`EngineConfig::from_toml_str`]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the first bad field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("poll_interval must be positive".into()));
        }
        if self.default_timeout.is_zero() {
            return Err(ConfigError::Invalid("default_timeout must be positive".into()));
        }
        if self.diagnostics_timeout.is_zero() {
            return Err(ConfigError::Invalid("diagnostics_timeout must be positive".into()));
        }
        if self.poll_interval > self.default_timeout {
            return Err(ConfigError::Invalid(format!(
                "poll_interval ({}) exceeds default_timeout ({})",
                humantime::format_duration(self.poll_interval),
                humantime::format_duration(self.default_timeout)
            )));
        }
        Ok(())
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset
    pub filter: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

mod human_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(d)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}
