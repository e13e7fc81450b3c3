//! `strata build` command - Build container or machine images from a template.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Args;
use strata_core::{BuildConfig, BuildOptions, StrataConfig};
use strata_runtime::{AwsCliFactory, BuildReport, BuildxFactory, TargetDispatcher};
use tokio_util::sync::CancellationToken;

use super::parse_key_values;
use crate::output;

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Template file (YAML)
    pub template: PathBuf,

    /// Target type to build (container, ami); defaults to the template's first target
    #[arg(long)]
    pub target: Option<String>,

    /// Architectures to build, comma-separated (e.g., amd64,arm64,arm/v7)
    #[arg(long = "arch", value_delimiter = ',')]
    pub architectures: Vec<String>,

    /// Registry to push to
    #[arg(long)]
    pub registry: Option<String>,

    /// Image tags, can be repeated
    #[arg(short = 't', long = "tag")]
    pub tags: Vec<String>,

    /// AWS region for machine image builds
    #[arg(long)]
    pub region: Option<String>,

    /// Build in several regions, comma-separated (overrides --region)
    #[arg(long, value_delimiter = ',')]
    pub regions: Vec<String>,

    /// Build regions concurrently instead of one after another
    #[arg(long)]
    pub parallel_regions: bool,

    /// Copy built machine images to these regions, comma-separated
    #[arg(long, value_delimiter = ',')]
    pub copy_to_regions: Vec<String>,

    /// Image labels (KEY=VALUE), can be repeated
    #[arg(long = "label")]
    pub labels: Vec<String>,

    /// Build-time variables (KEY=VALUE), can be repeated
    #[arg(long = "build-arg")]
    pub build_args: Vec<String>,

    /// External cache sources, can be repeated
    #[arg(long)]
    pub cache_from: Vec<String>,

    /// Cache export destinations, can be repeated
    #[arg(long)]
    pub cache_to: Vec<String>,

    /// Do not use cache when building
    #[arg(long)]
    pub no_cache: bool,

    /// Push built images to the registry
    #[arg(long)]
    pub push: bool,

    /// Write digest files for pushed images
    #[arg(long, requires = "push")]
    pub save_digests: bool,

    /// Directory for digest files (default: manifests.digest_dir from config)
    #[arg(long, value_name = "DIR")]
    pub digest_dir: Option<PathBuf>,

    /// Rebuild machine images even if one named after the template's ami_name exists
    #[arg(long)]
    pub force: bool,

    /// Validate and show what would be built, without building
    #[arg(long)]
    pub dry_run: bool,

    /// Write a JSON build report to this file
    #[arg(long, value_name = "PATH")]
    pub manifest_out: Option<PathBuf>,
}

impl BuildArgs {
    /// Per-invocation options; the template and config fill what is unset.
    pub fn to_options(&self, config: &StrataConfig) -> Result<BuildOptions, String> {
        Ok(BuildOptions {
            target_type: self.target.clone(),
            architectures: self
                .architectures
                .iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect(),
            platform: None,
            registry: self.registry.clone(),
            tags: self.tags.clone(),
            region: self.region.clone(),
            regions: self.regions.clone(),
            parallel_regions: self.parallel_regions,
            copy_to_regions: self.copy_to_regions.clone(),
            cache_from: self.cache_from.clone(),
            cache_to: self.cache_to.clone(),
            no_cache: self.no_cache,
            labels: parse_key_values(&self.labels, "label")?,
            build_args: parse_key_values(&self.build_args, "build arg")?,
            push: self.push,
            save_digests: self.save_digests,
            digest_dir: self
                .digest_dir
                .clone()
                .unwrap_or_else(|| config.manifests.digest_dir.clone()),
            force: self.force,
            dry_run: self.dry_run,
        })
    }
}

pub async fn execute(
    args: BuildArgs,
    config: &StrataConfig,
    cancel: &CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let template = BuildConfig::from_file(&args.template)?;
    let opts = args.to_options(config)?;

    let dispatcher = TargetDispatcher::new(
        config.clone(),
        Arc::new(BuildxFactory::new()),
        Arc::new(AwsCliFactory::new()),
    );

    let started = Instant::now();
    let outcome = dispatcher.dispatch(&template, &opts, cancel).await?;

    if opts.dry_run {
        println!(
            "Dry run complete for '{}' ({} target), nothing was built",
            template.name, outcome.target_type
        );
    } else if outcome.results.is_empty() {
        println!("No images were produced");
    } else {
        println!("{}", output::results_table(&outcome.results));
    }

    if let Some(path) = &args.manifest_out {
        BuildReport::new(
            &template,
            &outcome.target_type,
            &outcome.results,
            started.elapsed(),
            opts.push,
        )
        .write(path)?;
    }

    match outcome.error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
