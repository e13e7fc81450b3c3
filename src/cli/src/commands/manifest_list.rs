//! `strata manifests list` command - List the tags of a repository.

use std::path::PathBuf;

use clap::Args;
use strata_core::StrataConfig;
use strata_runtime::cancellable;
use strata_runtime::oci::{ManifestRegistry, RegistryAuth, RegistryClient};
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Repository (e.g., ghcr.io/acme/web)
    pub repository: String,

    /// Registry credentials file (default: ~/.config/strata/credentials.json)
    #[arg(long, value_name = "PATH")]
    pub auth_file: Option<PathBuf>,

    /// Talk to the registry over plain HTTP
    #[arg(long)]
    pub insecure: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(
    args: ListArgs,
    _config: &StrataConfig,
    cancel: &CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let auth = RegistryAuth::resolve(&args.repository, args.auth_file.as_deref())?;
    let client = RegistryClient::new(auth, args.insecure)?;

    let mut tags = cancellable(cancel, client.list_tags(&args.repository)).await?;
    tags.sort();

    if args.json {
        let output = serde_json::json!({
            "repository": args.repository,
            "tags": tags,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }
    if tags.is_empty() {
        println!("No tags found in {}", args.repository);
    }
    for tag in tags {
        println!("{tag}");
    }
    Ok(())
}
