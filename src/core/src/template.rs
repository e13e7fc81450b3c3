//! Build template: the declarative description of one logical image.
//!
//! Templates are read from YAML. Variable resolution and git source fetching
//! happen outside of Strata; the orchestrator only consumes the parsed result.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

/// Target type for container images.
pub const TARGET_CONTAINER: &str = "container";

/// Target type for AWS machine images.
pub const TARGET_AMI: &str = "ami";

/// Declarative build template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub metadata: Metadata,

    /// Image name
    pub name: String,

    /// Template version
    pub version: String,

    /// Base image
    pub base: BaseImage,

    /// Provisioning steps, executed by the build backend
    pub provisioners: Vec<Provisioner>,

    /// Declared build targets
    pub targets: Vec<Target>,

    /// Architectures declared by the template
    pub architectures: Vec<String>,

    /// External sources checked out before the build
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub description: Option<String>,
    pub author: Option<String>,
    pub license: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseImage {
    pub image: String,
    pub platform: Option<String>,
    pub env: BTreeMap<String, String>,
}

/// One provisioning step. Settings are passed through to the backend untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provisioner {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(flatten)]
    pub settings: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Source {
    pub name: String,
    pub git: Option<String>,
    pub path: Option<PathBuf>,
}

/// Build target declared in a template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Target {
    #[serde(rename = "type")]
    pub kind: String,

    // Container targets
    pub platforms: Vec<String>,
    pub registry: Option<String>,
    pub tags: Vec<String>,
    pub push: bool,
    pub dockerfile: Option<PathBuf>,
    pub context: Option<PathBuf>,

    // Machine image targets
    pub region: Option<String>,
    pub pipeline_arn: Option<String>,
    pub instance_type: Option<String>,
    pub ami_name: Option<String>,
    pub ami_tags: BTreeMap<String, String>,
}

impl BuildConfig {
    /// Read a template from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            StrataError::ConfigError(format!(
                "Failed to read template {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = serde_yaml::from_str(&data).map_err(|e| {
            StrataError::ConfigError(format!(
                "Failed to parse template {}: {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Minimal structural validation.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(StrataError::ConfigError(
                "template name is required".to_string(),
            ));
        }
        if let Some(target) = self.targets.iter().find(|t| t.kind.trim().is_empty()) {
            return Err(StrataError::ConfigError(format!(
                "target without a type in template '{}' ({:?})",
                self.name, target.platforms
            )));
        }
        Ok(())
    }

    /// First declared target of the given type.
    pub fn target(&self, kind: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.kind == kind)
    }

    /// Region of the first machine image target, if declared.
    pub fn default_region(&self) -> Option<&str> {
        self.target(TARGET_AMI).and_then(|t| t.region.as_deref())
    }

    /// Architectures implied by the container target's platforms
    /// (`linux/arm64` → `arm64`, `linux/arm/v7` → `arm/v7`).
    pub fn target_architectures(&self) -> Vec<String> {
        self.target(TARGET_CONTAINER)
            .map(|t| {
                t.platforms
                    .iter()
                    .map(|p| match p.split_once('/') {
                        Some((_, arch)) => arch.to_string(),
                        None => p.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}
