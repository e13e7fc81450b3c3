//! Registry credential file.
//!
//! Read from `~/.config/strata/credentials.json` unless `--auth-file` points
//! elsewhere:
//!
//! ```json
//! { "registries": { "ghcr.io": { "username": "bot", "password": "..." } } }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use strata_core::error::{Result, StrataError};

#[derive(Debug, Clone, Deserialize)]
struct CredentialEntry {
    username: String,
    password: String,
}

#[derive(Debug, Default, Deserialize)]
struct CredentialFile {
    #[serde(default)]
    registries: HashMap<String, CredentialEntry>,
}

/// Read-only per-registry credential lookup.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store at the default location.
    pub fn default_location() -> Option<Self> {
        dirs::config_dir().map(|dir| Self::new(dir.join("strata").join("credentials.json")))
    }

    /// Store at a custom path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Credentials for `registry` as `(username, password)`.
    pub fn get(&self, registry: &str) -> Result<Option<(String, String)>> {
        let file = self.load()?;
        Ok(file
            .registries
            .iter()
            .find(|(key, _)| normalize_registry(key) == normalize_registry(registry))
            .map(|(_, e)| (e.username.clone(), e.password.clone())))
    }

    fn load(&self) -> Result<CredentialFile> {
        if !self.path.exists() {
            return Ok(CredentialFile::default());
        }
        let data = std::fs::read_to_string(&self.path).map_err(|e| {
            StrataError::ConfigError(format!(
                "Failed to read credentials {}: {}",
                self.path.display(),
                e
            ))
        })?;
        let parse_error = |message: String| {
            StrataError::ConfigError(format!(
                "Failed to parse credentials {}: {}",
                self.path.display(),
                message
            ))
        };
        let value: serde_json::Value =
            serde_json::from_str(&data).map_err(|e| parse_error(e.to_string()))?;
        // Derived struct visitors also accept a JSON array.
        if !value.is_object() {
            return Err(parse_error("expected a JSON object".to_string()));
        }
        serde_json::from_value(value).map_err(|e| parse_error(e.to_string()))
    }
}

/// Docker Hub aliases collapse to one key.
fn normalize_registry(registry: &str) -> String {
    let r = registry.trim().trim_end_matches('/').to_lowercase();
    match r.as_str() {
        "docker.io" | "registry-1.docker.io" | "index.docker.io" => "index.docker.io".to_string(),
        _ => r,
    }
}
