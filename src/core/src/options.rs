//! Per-invocation build options.
//!
//! Constructed once from command-line flags and passed by reference through
//! the orchestration layer. Fan-out stages clone and specialize a copy per
//! unit of work (`for_region`, `for_platform`) instead of mutating shared state.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::template::{BuildConfig, TARGET_CONTAINER};

/// Per-invocation overrides
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildOptions {
    /// Target type override (`container`, `ami`)
    pub target_type: Option<String>,

    /// Architectures to build
    pub architectures: Vec<String>,

    /// Platform of a single per-architecture build (`linux/arm64`)
    pub platform: Option<String>,

    pub registry: Option<String>,
    pub tags: Vec<String>,

    /// Single region
    pub region: Option<String>,

    /// Region fan-out list, takes priority over `region`
    pub regions: Vec<String>,

    /// Run region builds concurrently
    pub parallel_regions: bool,

    /// Regions to replicate successful machine images into
    pub copy_to_regions: Vec<String>,

    pub cache_from: Vec<String>,
    pub cache_to: Vec<String>,
    pub no_cache: bool,

    pub labels: BTreeMap<String, String>,
    pub build_args: BTreeMap<String, String>,

    /// Push container results after building
    pub push: bool,

    /// Write digest files for pushed results
    pub save_digests: bool,
    pub digest_dir: PathBuf,

    pub force: bool,
    pub dry_run: bool,
}

impl BuildOptions {
    /// Copy specialized to one region.
    pub fn for_region(&self, region: Option<&str>) -> Self {
        let mut opts = self.clone();
        opts.region = region.map(str::to_string);
        opts
    }

    /// Copy specialized to one platform of a multi-architecture build.
    pub fn for_platform(&self, platform: &str) -> Self {
        let mut opts = self.clone();
        opts.platform = Some(platform.to_string());
        opts
    }

    /// Architectures to build: options > template > container target platforms > `amd64`.
    pub fn resolve_architectures(&self, config: &BuildConfig) -> Vec<String> {
        if !self.architectures.is_empty() {
            return self.architectures.clone();
        }
        if !config.architectures.is_empty() {
            return config.architectures.clone();
        }
        let from_targets = config.target_architectures();
        if !from_targets.is_empty() {
            return from_targets;
        }
        vec!["amd64".to_string()]
    }

    /// Registry: options > container target > fallback.
    pub fn resolve_registry(&self, config: &BuildConfig, fallback: Option<&str>) -> Option<String> {
        self.registry
            .clone()
            .or_else(|| {
                config
                    .target(TARGET_CONTAINER)
                    .and_then(|t| t.registry.clone())
            })
            .or_else(|| fallback.map(str::to_string))
    }

    /// Extra image tags: options > container target.
    ///
    /// Empty when neither names any; every build still carries its
    /// per-architecture tag.
    pub fn resolve_tags(&self, config: &BuildConfig) -> Vec<String> {
        if !self.tags.is_empty() {
            return self.tags.clone();
        }
        config
            .target(TARGET_CONTAINER)
            .map(|t| t.tags.clone())
            .unwrap_or_default()
    }
}
