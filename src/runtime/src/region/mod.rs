//! Region fan-out for machine image builds.
//!
//! One builder is created per region. Sequential mode keeps request order
//! and skips failed regions; parallel mode runs every region as its own
//! task, cancels the siblings on the first failure and keeps whatever
//! completed.

pub mod replicate;

use std::sync::Arc;
use std::time::Instant;

use strata_core::builder::{ClientConfig, ImageBuilder, ImageBuilderFactory, MonitorConfig};
use strata_core::error::{Result, StrataError};
use strata_core::{BuildConfig, BuildOptions, BuildResult, StrataConfig, TARGET_AMI};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::cancel::cancellable;

pub use replicate::{Replication, Replicator};

/// Regions to build in: `--regions` > `--region` > template > global config.
///
/// An empty list means a single build with no explicit region.
pub fn resolve_regions(
    opts: &BuildOptions,
    config: &BuildConfig,
    global: &StrataConfig,
) -> Vec<String> {
    let mut regions: Vec<String> = Vec::new();
    if !opts.regions.is_empty() {
        for region in &opts.regions {
            let region = region.trim();
            if !region.is_empty() && !regions.iter().any(|r| r == region) {
                regions.push(region.to_string());
            }
        }
        return regions;
    }
    opts.region
        .as_deref()
        .or_else(|| config.default_region())
        .or(global.aws.region.as_deref())
        .filter(|r| !r.trim().is_empty())
        .map(|r| vec![r.trim().to_string()])
        .unwrap_or_default()
}

fn region_label(region: Option<&str>) -> &str {
    region.unwrap_or("default")
}

/// What happened in one region.
#[derive(Debug)]
enum RegionOutcome {
    Built(BuildResult),
    /// Dry run: validation passed, nothing was built
    Validated,
    Failed(StrataError),
}

/// Everything one region's build needs, owned so it can move into a task.
struct RegionJob {
    region: Option<String>,
    client: ClientConfig,
    monitor: MonitorConfig,
    opts: BuildOptions,
}

impl RegionJob {
    async fn run(
        self,
        factory: &dyn ImageBuilderFactory,
        config: &BuildConfig,
        cancel: &CancellationToken,
    ) -> RegionOutcome {
        let label = region_label(self.region.as_deref()).to_string();
        let started = Instant::now();

        let builder = match cancellable(cancel, factory.create(&self.client, &self.monitor)).await
        {
            Ok(builder) => builder,
            Err(e) => {
                tracing::warn!(region = %label, error = %e, "Failed to create builder");
                return RegionOutcome::Failed(e);
            }
        };

        let outcome = if self.opts.dry_run {
            tracing::info!(region = %label, "Dry run: validating build");
            cancellable(cancel, builder.validate(config, &self.opts))
                .await
                .map(|()| None)
        } else if let Some(existing) = self.find_existing(&*builder, config, &label, cancel).await {
            Ok(Some(existing))
        } else {
            tracing::info!(region = %label, "Starting build");
            cancellable(cancel, builder.build(config, &self.opts))
                .await
                .map(Some)
        };

        if let Err(e) = builder.close().await {
            tracing::warn!(region = %label, error = %e, "Failed to close builder");
        }

        match outcome {
            Ok(Some(mut result)) => {
                if result.region.is_none() {
                    result.region = self.region.clone();
                }
                if result.duration.is_zero() {
                    result.duration = started.elapsed();
                }
                tracing::info!(region = %label, id = %result.id, "Region build complete");
                RegionOutcome::Built(result)
            }
            Ok(None) => RegionOutcome::Validated,
            Err(e) => {
                if !e.is_cancelled() {
                    tracing::warn!(region = %label, error = %e, "Region build failed");
                }
                RegionOutcome::Failed(e)
            }
        }
    }

    /// Image already carrying the template's `ami_name`, unless forced.
    ///
    /// A failed lookup falls through to a fresh build.
    async fn find_existing(
        &self,
        builder: &dyn ImageBuilder,
        config: &BuildConfig,
        label: &str,
        cancel: &CancellationToken,
    ) -> Option<BuildResult> {
        if self.opts.force {
            return None;
        }
        let name = config.target(TARGET_AMI)?.ami_name.as_deref()?;
        match cancellable(cancel, builder.find_image(name)).await {
            Ok(Some(id)) => {
                tracing::info!(
                    region = %label,
                    id = %id,
                    name = %name,
                    "Image already exists, skipping build"
                );
                let note = format!("existing image {} reused, use --force to rebuild", name);
                Some(BuildResult::machine_image(id, self.region.as_deref()).with_note(note))
            }
            Ok(None) => None,
            Err(e) => {
                if !e.is_cancelled() {
                    tracing::warn!(
                        region = %label,
                        error = %e,
                        "Could not look up existing image, building"
                    );
                }
                None
            }
        }
    }
}

/// Runs one machine image build per region.
pub struct RegionFanOut {
    factory: Arc<dyn ImageBuilderFactory>,
    client: ClientConfig,
    monitor: MonitorConfig,
    /// Parallel task bound, 0 for unbounded
    concurrency: usize,
}

impl RegionFanOut {
    pub fn new(
        factory: Arc<dyn ImageBuilderFactory>,
        client: ClientConfig,
        monitor: MonitorConfig,
    ) -> Self {
        Self {
            factory,
            client,
            monitor,
            concurrency: 0,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    fn job(&self, region: Option<&str>, opts: &BuildOptions) -> RegionJob {
        RegionJob {
            region: region.map(str::to_string),
            client: self.client.for_region(region),
            monitor: self.monitor.clone(),
            opts: opts.for_region(region),
        }
    }

    /// Build in every region of `regions` (or once, unscoped, when empty).
    pub async fn run(
        &self,
        config: &BuildConfig,
        opts: &BuildOptions,
        regions: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<BuildResult>> {
        if regions.is_empty() {
            let outcome = self.job(None, opts).run(&*self.factory, config, cancel).await;
            return match outcome {
                RegionOutcome::Built(result) => Ok(vec![result]),
                RegionOutcome::Validated => Ok(Vec::new()),
                RegionOutcome::Failed(e) => Err(e),
            };
        }

        if opts.parallel_regions && regions.len() > 1 {
            self.run_parallel(config, opts, regions, cancel).await
        } else {
            self.run_sequential(config, opts, regions, cancel).await
        }
    }

    /// Regions one after another; results keep request order.
    pub async fn run_sequential(
        &self,
        config: &BuildConfig,
        opts: &BuildOptions,
        regions: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<BuildResult>> {
        tracing::info!(count = regions.len(), "Building regions sequentially");

        let mut results = Vec::new();
        let mut failures = Vec::new();
        for region in regions {
            match self
                .job(Some(region), opts)
                .run(&*self.factory, config, cancel)
                .await
            {
                RegionOutcome::Built(result) => results.push(result),
                RegionOutcome::Validated => {}
                RegionOutcome::Failed(e) => failures.push((region.clone(), e)),
            }
        }

        finish_sequential(results, failures, regions.len(), cancel)
    }

    /// Regions as concurrent tasks; results are in completion order.
    pub async fn run_parallel(
        &self,
        config: &BuildConfig,
        opts: &BuildOptions,
        regions: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<BuildResult>> {
        tracing::info!(
            count = regions.len(),
            concurrency = self.concurrency,
            "Building regions in parallel"
        );

        let group = cancel.child_token();
        let semaphore = (self.concurrency > 0).then(|| Arc::new(Semaphore::new(self.concurrency)));
        let config = Arc::new(config.clone());
        let mut tasks = JoinSet::new();

        for region in regions {
            let job = self.job(Some(region), opts);
            let factory = self.factory.clone();
            let config = config.clone();
            let group = group.clone();
            let semaphore = semaphore.clone();
            let region = region.clone();

            tasks.spawn(async move {
                let _permit = match semaphore {
                    Some(semaphore) => {
                        match cancellable(&group, async {
                            semaphore
                                .acquire_owned()
                                .await
                                .map_err(|_| StrataError::Cancelled)
                        })
                        .await
                        {
                            Ok(permit) => Some(permit),
                            Err(e) => return (region, RegionOutcome::Failed(e)),
                        }
                    }
                    None => None,
                };
                let outcome = job.run(&*factory, &config, &group).await;
                (region, outcome)
            });
        }

        let mut results = Vec::new();
        let mut failures = Vec::new();
        let mut succeeded = 0usize;
        while let Some(joined) = tasks.join_next().await {
            let (region, outcome) = match joined {
                Ok(done) => done,
                Err(e) => (
                    String::from("unknown"),
                    RegionOutcome::Failed(StrataError::Other(format!(
                        "region task failed: {}",
                        e
                    ))),
                ),
            };
            match outcome {
                RegionOutcome::Built(result) => {
                    succeeded += 1;
                    results.push(result);
                }
                RegionOutcome::Validated => succeeded += 1,
                RegionOutcome::Failed(e) => {
                    if failures.is_empty() && !e.is_cancelled() {
                        tracing::warn!(region = %region, "Cancelling remaining region builds");
                        group.cancel();
                    }
                    failures.push((region, e));
                }
            }
        }

        if failures.is_empty() {
            return Ok(results);
        }
        if succeeded > 0 {
            tracing::warn!(
                succeeded,
                failed = failures.len(),
                total = regions.len(),
                "Parallel region builds partially failed, keeping completed results"
            );
            return Ok(results);
        }
        if cancel.is_cancelled() {
            return Err(StrataError::Cancelled);
        }
        Err(aggregate(failures, regions.len()))
    }
}

fn finish_sequential(
    results: Vec<BuildResult>,
    failures: Vec<(String, StrataError)>,
    total: usize,
    cancel: &CancellationToken,
) -> Result<Vec<BuildResult>> {
    if failures.is_empty() {
        return Ok(results);
    }
    if failures.len() == total {
        if cancel.is_cancelled() {
            return Err(StrataError::Cancelled);
        }
        return Err(aggregate(failures, total));
    }
    let failed_regions = failures
        .iter()
        .map(|(r, _)| r.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    tracing::warn!(
        failed_regions = %failed_regions,
        "Some regional builds failed ({}/{} regions succeeded)",
        total - failures.len(),
        total
    );
    Ok(results)
}

fn aggregate(failures: Vec<(String, StrataError)>, total: usize) -> StrataError {
    StrataError::RegionBuildsFailed {
        failed: failures.len(),
        total,
        details: failures
            .into_iter()
            .map(|(region, e)| format!("{}: {}", region, e))
            .collect(),
    }
}
