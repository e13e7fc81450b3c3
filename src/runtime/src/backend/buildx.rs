//! Container builds through `docker buildx`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use strata_core::builder::{ContainerBuilder, ContainerBuilderFactory};
use strata_core::error::{Result, StrataError};
use strata_core::{BuildConfig, BuildOptions, BuildResult, TARGET_CONTAINER};

use super::process::ProcessRunner;
use crate::oci::digest::parse_digest;
use crate::oci::platform::{encode_architecture, Platform};

const BACKEND: &str = "buildx";

/// Creates [`BuildxBuilder`]s after checking that buildx is usable.
pub struct BuildxFactory {
    runner: ProcessRunner,
}

impl BuildxFactory {
    pub fn new() -> Self {
        Self::with_program("docker")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            runner: ProcessRunner::new(program),
        }
    }
}

impl Default for BuildxFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerBuilderFactory for BuildxFactory {
    async fn create(&self) -> Result<Box<dyn ContainerBuilder>> {
        let version = self.runner.run(["buildx", "version"]).await?;
        tracing::debug!(version = %version.stdout.trim(), "Using docker buildx");
        Ok(Box::new(BuildxBuilder {
            runner: self.runner.clone(),
        }))
    }
}

pub struct BuildxBuilder {
    runner: ProcessRunner,
}

#[async_trait]
impl ContainerBuilder for BuildxBuilder {
    async fn build(&self, config: &BuildConfig, options: &BuildOptions) -> Result<BuildResult> {
        let platform_str = options
            .platform
            .clone()
            .unwrap_or_else(|| "linux/amd64".to_string());
        let platform = Platform::parse(&platform_str);
        let architecture = platform.arch_token();
        let tag = local_tag(&config.name, &architecture);

        let metadata = tempfile::Builder::new()
            .prefix("strata-buildx-")
            .suffix(".json")
            .tempfile()?;
        let args = build_args(config, options, &platform_str, &tag, metadata.path());

        tracing::info!(platform = %platform_str, tag = %tag, "Running docker buildx build");
        self.runner.run(&args).await?;

        let mut result = BuildResult::container(&tag)
            .with_platform(platform_str)
            .with_architecture(architecture);
        if let Some(digest) = read_metadata_digest(metadata.path()) {
            result = result.with_note(format!("image digest {}", digest));
        }
        Ok(result)
    }

    async fn push(&self, image_ref: &str, registry: &str) -> Result<String> {
        let local = local_ref(image_ref, registry);
        if local != image_ref {
            self.runner.run(["tag", local, image_ref]).await?;
        }
        self.runner.run(["push", image_ref]).await?;

        let inspect = self
            .runner
            .run(["image", "inspect", "--format", "{{json .RepoDigests}}", image_ref])
            .await?;
        let repo_digests: Vec<String> = serde_json::from_str(inspect.stdout.trim())?;
        repo_digest_for(&repo_digests, image_ref).ok_or_else(|| StrataError::BackendError {
            backend: BACKEND.to_string(),
            message: format!("no repository digest recorded for {}", image_ref),
        })
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Local per-architecture tag (`web`, `arm/v7` → `web:arm-v7`).
pub fn local_tag(name: &str, architecture: &str) -> String {
    format!("{}:{}", name, encode_architecture(architecture))
}

fn build_args(
    config: &BuildConfig,
    options: &BuildOptions,
    platform: &str,
    tag: &str,
    metadata_file: &Path,
) -> Vec<String> {
    let target = config.target(TARGET_CONTAINER);
    let context = target
        .and_then(|t| t.context.clone())
        .unwrap_or_else(|| PathBuf::from("."));

    let mut args = vec![
        "buildx".to_string(),
        "build".to_string(),
        "--platform".to_string(),
        platform.to_string(),
        "--tag".to_string(),
        tag.to_string(),
        "--load".to_string(),
        "--metadata-file".to_string(),
        metadata_file.display().to_string(),
    ];
    // Extra tags arrive already specialized to this platform.
    for extra in &options.tags {
        args.push("--tag".to_string());
        args.push(format!("{}:{}", config.name, extra));
    }
    if let Some(dockerfile) = target.and_then(|t| t.dockerfile.as_ref()) {
        args.push("--file".to_string());
        args.push(dockerfile.display().to_string());
    }
    for (key, value) in &options.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }
    for (key, value) in &options.build_args {
        args.push("--build-arg".to_string());
        args.push(format!("{}={}", key, value));
    }
    for source in &options.cache_from {
        args.push("--cache-from".to_string());
        args.push(source.clone());
    }
    for dest in &options.cache_to {
        args.push("--cache-to".to_string());
        args.push(dest.clone());
    }
    if options.no_cache {
        args.push("--no-cache".to_string());
    }
    args.push(context.display().to_string());
    args
}

fn read_metadata_digest(path: &Path) -> Option<String> {
    let data = std::fs::read_to_string(path).ok()?;
    let value: serde_json::Value = serde_json::from_str(&data).ok()?;
    value
        .get("containerimage.digest")
        .and_then(|d| d.as_str())
        .map(str::to_string)
}

/// Local image name for a registry-qualified reference.
fn local_ref<'a>(image_ref: &'a str, registry: &str) -> &'a str {
    let prefix = registry.trim_end_matches('/');
    image_ref
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(image_ref)
}

/// Reference without its tag (`host:5000/web:amd64` → `host:5000/web`).
fn strip_tag(image_ref: &str) -> &str {
    let name_start = image_ref.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image_ref[name_start..].find(':') {
        Some(i) => &image_ref[..name_start + i],
        None => image_ref,
    }
}

fn repo_digest_for(repo_digests: &[String], image_ref: &str) -> Option<String> {
    let repository = strip_tag(image_ref);
    repo_digests
        .iter()
        .filter_map(|entry| entry.split_once('@'))
        .find(|(repo, _)| *repo == repository)
        .and_then(|(_, digest)| parse_digest(digest).ok())
}
