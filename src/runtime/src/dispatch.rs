//! Routes a build to the container or machine image backend.

use std::sync::Arc;

use strata_core::builder::{
    ClientConfig, ContainerBuilderFactory, ImageBuilderFactory, MonitorConfig,
};
use strata_core::error::{Result, StrataError};
use strata_core::{
    BuildConfig, BuildOptions, BuildResult, StrataConfig, TARGET_AMI, TARGET_CONTAINER,
};
use tokio_util::sync::CancellationToken;

use crate::container::ContainerBuildService;
use crate::region::{resolve_regions, RegionFanOut, Replicator};

/// Target type: options > first template target > `container`.
pub fn determine_target_type(config: &BuildConfig, opts: &BuildOptions) -> String {
    if let Some(kind) = &opts.target_type {
        return kind.trim().to_string();
    }
    config
        .targets
        .first()
        .map(|t| t.kind.trim().to_string())
        .unwrap_or_else(|| TARGET_CONTAINER.to_string())
}

/// Results of a dispatched build.
///
/// `error` carries a failure that happened after some results were
/// produced (a failed cross-region copy); the results stay valid.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub target_type: String,
    pub results: Vec<BuildResult>,
    pub error: Option<StrataError>,
}

pub struct TargetDispatcher {
    global: StrataConfig,
    containers: Arc<dyn ContainerBuilderFactory>,
    images: Arc<dyn ImageBuilderFactory>,
}

impl TargetDispatcher {
    pub fn new(
        global: StrataConfig,
        containers: Arc<dyn ContainerBuilderFactory>,
        images: Arc<dyn ImageBuilderFactory>,
    ) -> Self {
        Self {
            global,
            containers,
            images,
        }
    }

    pub async fn dispatch(
        &self,
        config: &BuildConfig,
        opts: &BuildOptions,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome> {
        let target_type = determine_target_type(config, opts);
        tracing::info!(template = %config.name, target = %target_type, "Dispatching build");

        let (results, error) = match target_type.as_str() {
            TARGET_CONTAINER => (self.build_containers(config, opts, cancel).await?, None),
            TARGET_AMI => self.build_machine_images(config, opts, cancel).await?,
            other => return Err(StrataError::UnsupportedTarget(other.to_string())),
        };

        Ok(DispatchOutcome {
            target_type,
            results,
            error,
        })
    }

    async fn build_containers(
        &self,
        config: &BuildConfig,
        opts: &BuildOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<BuildResult>> {
        ContainerBuildService::new(self.containers.clone(), self.global.build.concurrency)
            .with_default_registry(self.global.registry.default.clone())
            .run(config, opts, cancel)
            .await
    }

    async fn build_machine_images(
        &self,
        config: &BuildConfig,
        opts: &BuildOptions,
        cancel: &CancellationToken,
    ) -> Result<(Vec<BuildResult>, Option<StrataError>)> {
        let client = ClientConfig {
            region: self.global.aws.region.clone(),
            profile: self.global.aws.profile.clone(),
        };
        let monitor = MonitorConfig::from(&self.global);
        let regions = resolve_regions(opts, config, &self.global);

        let mut results = RegionFanOut::new(self.images.clone(), client.clone(), monitor.clone())
            .with_concurrency(self.global.build.region_concurrency)
            .run(config, opts, &regions, cancel)
            .await?;

        if opts.dry_run || opts.copy_to_regions.is_empty() || results.is_empty() {
            return Ok((results, None));
        }

        let name = config
            .target(TARGET_AMI)
            .and_then(|t| t.ami_name.clone())
            .unwrap_or_else(|| config.name.clone());
        let replicator = Replicator::new(self.images.clone(), client.clone(), monitor);

        let mut copies = Vec::new();
        let mut failed = 0;
        let mut total = 0;
        let mut details = Vec::new();
        for result in &results {
            let Some(source) = result.region.clone().or_else(|| client.region.clone()) else {
                tracing::warn!(image = %result.id, "Source region unknown, not replicating");
                failed += 1;
                total += 1;
                details.push(format!("{}: source region unknown", result.id));
                continue;
            };
            let replication = replicator
                .replicate(&result.id, &source, &opts.copy_to_regions, &name, cancel)
                .await;
            total += replication.results.len();
            copies.extend(replication.results);
            match replication.error {
                Some(StrataError::RegionCopiesFailed {
                    failed: f,
                    details: d,
                    ..
                }) => {
                    failed += f;
                    total += f;
                    details.extend(d);
                }
                Some(other) => {
                    failed += 1;
                    total += 1;
                    details.push(other.to_string());
                }
                None => {}
            }
        }
        results.extend(copies);

        let error = (failed > 0).then(|| StrataError::RegionCopiesFailed {
            failed,
            total,
            details,
        });
        Ok((results, error))
    }
}
