//! `strata manifests create` command - Assemble digest files into a
//! multi-architecture manifest and push it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Args};
use strata_core::StrataConfig;
use strata_runtime::oci::{
    check_registry_health, discover_digest_files, filter_architectures, resolve_concurrency,
    validate_digest_files, verify_digests, AssembleOptions, AssembleOutcome, FilterOptions,
    ManifestAssembler, ManifestRegistry, RegistryAuth, RegistryClient, RepositoryRef,
    ValidationOptions,
};
use tokio_util::sync::CancellationToken;

use super::parse_key_values;
use crate::output;

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Image name used in the digest file names
    #[arg(long)]
    pub name: String,

    /// Registry to push to (default: registry.default from config)
    #[arg(long)]
    pub registry: Option<String>,

    /// Namespace between registry and image (e.g., an organization)
    #[arg(long, default_value = "")]
    pub namespace: String,

    /// Manifest tags, can be repeated
    #[arg(short = 't', long = "tag", default_value = "latest")]
    pub tags: Vec<String>,

    /// Directory holding digest files (default: manifests.digest_dir from config)
    #[arg(long, value_name = "DIR")]
    pub digest_dir: Option<PathBuf>,

    /// Architectures that must be present, comma-separated
    #[arg(long, value_delimiter = ',')]
    pub require_arch: Vec<String>,

    /// Create the manifest from the available architectures when some are missing
    #[arg(long)]
    pub best_effort: bool,

    /// Reject digest files older than this (e.g., 2h, 1d)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub max_age: Option<Duration>,

    /// Confirm every digest exists in the registry before pushing
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub verify_registry: bool,

    /// Concurrent registry verifications (default: manifests.verify_concurrency from config)
    #[arg(long)]
    pub verify_concurrency: Option<usize>,

    /// Check that the registry answers before doing anything else
    #[arg(long)]
    pub health_check: bool,

    /// Registry credentials file (default: ~/.config/strata/credentials.json)
    #[arg(long, value_name = "PATH")]
    pub auth_file: Option<PathBuf>,

    /// Manifest annotations (KEY=VALUE), can be repeated
    #[arg(long = "annotation")]
    pub annotations: Vec<String>,

    /// Labels (KEY=VALUE), published as org.opencontainers.image.<KEY> annotations
    #[arg(long = "label")]
    pub labels: Vec<String>,

    /// Push even if the registry already has an identical manifest
    #[arg(long)]
    pub force: bool,

    /// Show what would be created, without pushing
    #[arg(long)]
    pub dry_run: bool,

    /// Talk to the registry over plain HTTP
    #[arg(long)]
    pub insecure: bool,
}

pub async fn execute(
    args: CreateArgs,
    config: &StrataConfig,
    cancel: &CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = args
        .registry
        .clone()
        .or_else(|| config.registry.default.clone())
        .ok_or("a registry is required (use --registry or set registry.default in config)")?;
    let digest_dir = args
        .digest_dir
        .clone()
        .unwrap_or_else(|| config.manifests.digest_dir.clone());

    let discovered = discover_digest_files(&args.name, &digest_dir)?;
    validate_digest_files(
        &discovered,
        &ValidationOptions {
            image_name: args.name.clone(),
            max_age: args.max_age.unwrap_or_default(),
        },
    )?;
    let selected = filter_architectures(
        &discovered,
        &FilterOptions {
            required: args.require_arch.clone(),
            best_effort: args.best_effort,
        },
    )?;

    let repository = RepositoryRef::new(&registry, &args.namespace, &args.name)?;
    let auth = RegistryAuth::resolve(&registry, args.auth_file.as_deref())?;
    let client: Arc<dyn ManifestRegistry> = Arc::new(RegistryClient::new(auth, args.insecure)?);

    if args.health_check {
        check_registry_health(&*client, repository.host(), cancel).await?;
    }

    if args.verify_registry {
        let concurrency =
            resolve_concurrency(args.verify_concurrency, Some(config.manifests.verify_concurrency));
        verify_digests(client.clone(), &selected, &repository, concurrency, cancel).await?;
    } else {
        tracing::warn!("Registry verification disabled");
    }

    let opts = AssembleOptions {
        tags: args.tags.clone(),
        annotations: parse_key_values(&args.annotations, "annotation")?,
        labels: parse_key_values(&args.labels, "label")?,
        force: args.force,
        dry_run: args.dry_run,
    };
    let outcome = ManifestAssembler::new(client)
        .assemble(&repository, &selected, &opts, cancel)
        .await?;

    match outcome {
        AssembleOutcome::UpToDate(references) => {
            for reference in references {
                println!("{reference} is up to date");
            }
        }
        AssembleOutcome::DryRun(plans) => {
            for plan in plans {
                println!("Would create {}:", plan.reference);
                let mut table = output::new_table(&["PLATFORM", "DIGEST", "IMAGE"]);
                for entry in &plan.entries {
                    table.add_row(vec![
                        entry.platform.clone(),
                        output::short_digest(&entry.digest),
                        entry.image_ref.clone(),
                    ]);
                }
                println!("{table}");
            }
        }
        AssembleOutcome::Pushed(manifests) => {
            for manifest in manifests {
                println!("{} {}", manifest.reference, manifest.digest);
            }
        }
    }
    Ok(())
}
