//! Global Strata configuration.
//!
//! Read from `~/.config/strata/config.yaml` unless a path is given explicitly.
//! A missing file yields the built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

/// Default bound for multi-architecture container builds.
pub const DEFAULT_BUILD_CONCURRENCY: usize = 2;

/// Default number of concurrent registry verifications.
pub const DEFAULT_VERIFY_CONCURRENCY: usize = 5;

/// Upper bound for concurrent registry verifications.
pub const MAX_VERIFY_CONCURRENCY: usize = 20;

/// Global configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    pub registry: RegistryConfig,
    pub aws: AwsConfig,
    pub build: BuildSettings,
    pub manifests: ManifestSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry used when neither the command line nor the template names one
    pub default: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    pub region: Option<String>,
    pub profile: Option<String>,
}

/// Build phase settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    /// Concurrent per-architecture container builds
    pub concurrency: usize,

    /// Bound for parallel region fan-out (0 = unbounded)
    pub region_concurrency: usize,

    pub monitor: MonitorSettings,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_BUILD_CONCURRENCY,
            region_concurrency: 0,
            monitor: MonitorSettings::default(),
        }
    }
}

/// Polling settings for long-running cloud image builds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            timeout_secs: 7200,
        }
    }
}

impl MonitorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Manifest command settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestSettings {
    pub verify_concurrency: usize,
    pub digest_dir: PathBuf,
}

impl Default for ManifestSettings {
    fn default() -> Self {
        Self {
            verify_concurrency: DEFAULT_VERIFY_CONCURRENCY,
            digest_dir: PathBuf::from("."),
        }
    }
}

impl StrataConfig {
    /// Default config location (`~/.config/strata/config.yaml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("strata").join("config.yaml"))
    }

    /// Load configuration from `path`, or from the default location.
    ///
    /// An explicit path must exist; the default location may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => {
                    tracing::debug!("No global config file, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    /// Parse a YAML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            StrataError::ConfigError(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&data).map_err(|e| {
            StrataError::ConfigError(format!("Failed to parse config {}: {}", path.display(), e))
        })
    }

    /// Parse YAML config content. Empty content yields defaults.
    pub fn from_yaml(data: &str) -> Result<Self> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(data)?)
    }
}
