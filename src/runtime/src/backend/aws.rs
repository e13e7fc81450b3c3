//! Machine image builds through EC2 Image Builder, driven by the `aws` CLI.
//!
//! A build starts an execution of the template's image pipeline and polls
//! the resulting image until it is available, failed or the monitor
//! timeout expires.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use strata_core::builder::{ClientConfig, ImageBuilder, ImageBuilderFactory, MonitorConfig};
use strata_core::error::{Result, StrataError};
use strata_core::template::Target;
use strata_core::{BuildConfig, BuildOptions, BuildResult, TARGET_AMI};

use super::process::ProcessRunner;

/// Image Builder image status, as far as the poll loop cares.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ImageState {
    InProgress(String),
    /// `(region, ami id)` pairs of the distributed images
    Available(Vec<(String, String)>),
    Failed(String),
}

fn parse_image_state(value: &Value) -> Result<ImageState> {
    let image = &value["image"];
    let status = image["state"]["status"]
        .as_str()
        .ok_or_else(|| unexpected("get-image response without image.state.status"))?;

    Ok(match status {
        "AVAILABLE" => {
            let amis = image["outputResources"]["amis"]
                .as_array()
                .map(|amis| {
                    amis.iter()
                        .filter_map(|ami| {
                            Some((
                                ami["region"].as_str()?.to_string(),
                                ami["image"].as_str()?.to_string(),
                            ))
                        })
                        .collect()
                })
                .unwrap_or_default();
            ImageState::Available(amis)
        }
        "FAILED" | "CANCELLED" | "DELETED" => ImageState::Failed(format!(
            "{}: {}",
            status,
            image["state"]["reason"].as_str().unwrap_or("no reason given")
        )),
        other => ImageState::InProgress(other.to_string()),
    })
}

/// AMI produced in `region`, or the first one when the region is unknown.
fn pick_ami(amis: &[(String, String)], region: Option<&str>) -> Option<String> {
    region
        .and_then(|r| amis.iter().find(|(ami_region, _)| ami_region == r))
        .or_else(|| amis.first())
        .map(|(_, id)| id.clone())
}

/// Most recently created available image in a `describe-images` response.
fn newest_image(value: &Value) -> Option<String> {
    value["Images"]
        .as_array()?
        .iter()
        .filter(|image| image["State"].as_str().map_or(true, |s| s == "available"))
        .filter_map(|image| {
            Some((
                image["CreationDate"].as_str().unwrap_or_default(),
                image["ImageId"].as_str()?,
            ))
        })
        .max_by(|a, b| a.0.cmp(b.0))
        .map(|(_, id)| id.to_string())
}

fn unexpected(message: impl Into<String>) -> StrataError {
    StrataError::BackendError {
        backend: "aws".to_string(),
        message: message.into(),
    }
}

fn ami_target(config: &BuildConfig) -> Result<&Target> {
    config.target(TARGET_AMI).ok_or_else(|| {
        StrataError::ConfigError(format!("template '{}' has no ami target", config.name))
    })
}

fn pipeline_arn(target: &Target) -> Result<&str> {
    target
        .pipeline_arn
        .as_deref()
        .filter(|arn| !arn.trim().is_empty())
        .ok_or_else(|| StrataError::ConfigError("ami target requires pipeline_arn".to_string()))
}

/// Creates region-scoped [`AwsCliImageBuilder`]s.
pub struct AwsCliFactory {
    program: String,
}

impl AwsCliFactory {
    pub fn new() -> Self {
        Self::with_program("aws")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for AwsCliFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageBuilderFactory for AwsCliFactory {
    async fn create(
        &self,
        client: &ClientConfig,
        monitor: &MonitorConfig,
    ) -> Result<Box<dyn ImageBuilder>> {
        let mut runner = ProcessRunner::new(self.program.clone());
        if let Some(profile) = &client.profile {
            runner = runner.with_env("AWS_PROFILE", profile.clone());
        }
        runner.run(["--version"]).await?;

        Ok(Box::new(AwsCliImageBuilder {
            runner,
            region: client.region.clone(),
            monitor: monitor.clone(),
        }))
    }
}

pub struct AwsCliImageBuilder {
    runner: ProcessRunner,
    region: Option<String>,
    monitor: MonitorConfig,
}

impl AwsCliImageBuilder {
    /// Run `aws <service> <command> ...` scoped to this builder's region.
    async fn call(&self, args: &[&str]) -> Result<Value> {
        let mut full: Vec<&str> = args.to_vec();
        if let Some(region) = &self.region {
            full.push("--region");
            full.push(region);
        }
        full.push("--output");
        full.push("json");
        self.runner.run_json(&full).await
    }

    async fn wait_for_image(&self, build_version_arn: &str) -> Result<Vec<(String, String)>> {
        let started = Instant::now();
        loop {
            let response = self
                .call(&[
                    "imagebuilder",
                    "get-image",
                    "--image-build-version-arn",
                    build_version_arn,
                ])
                .await?;
            match parse_image_state(&response)? {
                ImageState::Available(amis) => return Ok(amis),
                ImageState::Failed(reason) => {
                    return Err(StrataError::BuildError(format!(
                        "image build {} failed ({})",
                        build_version_arn, reason
                    )))
                }
                ImageState::InProgress(status) => {
                    tracing::info!(
                        status = %status,
                        elapsed_secs = started.elapsed().as_secs(),
                        "Waiting for image build"
                    );
                }
            }
            if started.elapsed() >= self.monitor.timeout {
                return Err(StrataError::BuildError(format!(
                    "image build {} did not finish within {:?}",
                    build_version_arn, self.monitor.timeout
                )));
            }
            tokio::time::sleep(self.monitor.poll_interval).await;
        }
    }

    async fn tag_image(&self, image_id: &str, target: &Target) -> Result<()> {
        if target.ami_tags.is_empty() {
            return Ok(());
        }
        let tags: Vec<String> = target
            .ami_tags
            .iter()
            .map(|(key, value)| format!("Key={},Value={}", key, value))
            .collect();
        let mut args = vec!["ec2", "create-tags", "--resources", image_id, "--tags"];
        args.extend(tags.iter().map(String::as_str));
        self.call(&args).await.map(|_| ())
    }
}

#[async_trait]
impl ImageBuilder for AwsCliImageBuilder {
    async fn build(&self, config: &BuildConfig, options: &BuildOptions) -> Result<BuildResult> {
        let target = ami_target(config)?;
        let arn = pipeline_arn(target)?;
        let started = Instant::now();

        let response = self
            .call(&[
                "imagebuilder",
                "start-image-pipeline-execution",
                "--image-pipeline-arn",
                arn,
            ])
            .await?;
        let build_version_arn = response["imageBuildVersionArn"]
            .as_str()
            .ok_or_else(|| unexpected("pipeline execution returned no imageBuildVersionArn"))?
            .to_string();
        tracing::info!(
            pipeline = %arn,
            build = %build_version_arn,
            region = ?self.region,
            "Started image pipeline"
        );

        let amis = self.wait_for_image(&build_version_arn).await?;
        let region = options.region.as_deref().or(self.region.as_deref());
        let image_id = pick_ami(&amis, region).ok_or_else(|| {
            StrataError::BuildError(format!("image build {} produced no AMI", build_version_arn))
        })?;
        self.tag_image(&image_id, target).await?;

        Ok(BuildResult::machine_image(image_id, region)
            .with_duration(started.elapsed())
            .with_note(format!("built by {}", build_version_arn)))
    }

    async fn validate(&self, config: &BuildConfig, _options: &BuildOptions) -> Result<()> {
        let arn = pipeline_arn(ami_target(config)?)?;
        let response = self
            .call(&[
                "imagebuilder",
                "get-image-pipeline",
                "--image-pipeline-arn",
                arn,
            ])
            .await?;
        match response["imagePipeline"]["status"].as_str() {
            Some("DISABLED") => Err(StrataError::ConfigError(format!(
                "image pipeline {} is disabled",
                arn
            ))),
            _ => {
                tracing::info!(pipeline = %arn, region = ?self.region, "Image pipeline is usable");
                Ok(())
            }
        }
    }

    async fn find_image(&self, name: &str) -> Result<Option<String>> {
        let filter = format!("Name=name,Values={}", name);
        let response = self
            .call(&["ec2", "describe-images", "--owners", "self", "--filters", &filter])
            .await?;
        Ok(newest_image(&response))
    }

    async fn copy(
        &self,
        image_id: &str,
        source_region: &str,
        target_region: &str,
        name: &str,
    ) -> Result<String> {
        let response = self
            .runner
            .run_json([
                "ec2",
                "copy-image",
                "--source-image-id",
                image_id,
                "--source-region",
                source_region,
                "--region",
                target_region,
                "--name",
                name,
                "--output",
                "json",
            ])
            .await?;
        response["ImageId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| unexpected("copy-image returned no ImageId"))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
