//! Builder capabilities - traits implemented by concrete build backends.
//!
//! The orchestration layer depends only on these traits. Every handle
//! returned by a factory must be `close()`d by its user on every exit path.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::StrataConfig;
use crate::error::Result;
use crate::options::BuildOptions;
use crate::result::BuildResult;
use crate::template::BuildConfig;

/// Cloud client settings for one region-scoped builder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientConfig {
    pub region: Option<String>,
    pub profile: Option<String>,
}

impl ClientConfig {
    pub fn for_region(&self, region: Option<&str>) -> Self {
        Self {
            region: region.map(str::to_string).or_else(|| self.region.clone()),
            profile: self.profile.clone(),
        }
    }
}

/// Polling policy for long-running builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(2 * 60 * 60),
        }
    }
}

impl From<&StrataConfig> for MonitorConfig {
    fn from(config: &StrataConfig) -> Self {
        Self {
            poll_interval: config.build.monitor.poll_interval(),
            timeout: config.build.monitor.timeout(),
        }
    }
}

/// Container image build engine.
#[async_trait]
pub trait ContainerBuilder: Send + Sync {
    /// Build one image for the platform in `options.platform`.
    async fn build(&self, config: &BuildConfig, options: &BuildOptions) -> Result<BuildResult>;

    /// Push a local image to `registry`, returning the pushed digest.
    async fn push(&self, image_ref: &str, registry: &str) -> Result<String>;

    /// Release engine resources.
    async fn close(&self) -> Result<()>;
}

/// Creates container builders.
#[async_trait]
pub trait ContainerBuilderFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn ContainerBuilder>>;
}

/// Cloud machine image build engine, scoped to one region.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Build a machine image.
    async fn build(&self, config: &BuildConfig, options: &BuildOptions) -> Result<BuildResult>;

    /// Check that a build could run, without building.
    async fn validate(&self, config: &BuildConfig, options: &BuildOptions) -> Result<()>;

    /// Newest image named `name` owned by this account, if any.
    async fn find_image(&self, name: &str) -> Result<Option<String>>;

    /// Copy an image between regions, returning the new image ID.
    async fn copy(
        &self,
        image_id: &str,
        source_region: &str,
        target_region: &str,
        name: &str,
    ) -> Result<String>;

    /// Release client resources.
    async fn close(&self) -> Result<()>;
}

/// Creates region-scoped image builders.
#[async_trait]
pub trait ImageBuilderFactory: Send + Sync {
    async fn create(
        &self,
        client: &ClientConfig,
        monitor: &MonitorConfig,
    ) -> Result<Box<dyn ImageBuilder>>;
}
