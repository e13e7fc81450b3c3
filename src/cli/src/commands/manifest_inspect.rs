//! `strata manifests inspect` command - Show the platforms of a published manifest.

use std::path::PathBuf;

use clap::Args;
use strata_core::StrataConfig;
use strata_runtime::cancellable;
use strata_runtime::oci::{ManifestRegistry, RegistryAuth, RegistryClient};
use tokio_util::sync::CancellationToken;

use crate::output;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Manifest reference (e.g., ghcr.io/acme/web:latest)
    pub reference: String,

    /// Registry credentials file (default: ~/.config/strata/credentials.json)
    #[arg(long, value_name = "PATH")]
    pub auth_file: Option<PathBuf>,

    /// Talk to the registry over plain HTTP
    #[arg(long)]
    pub insecure: bool,

    /// Print the raw index as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(
    args: InspectArgs,
    _config: &StrataConfig,
    cancel: &CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let auth = RegistryAuth::resolve(&args.reference, args.auth_file.as_deref())?;
    let client = RegistryClient::new(auth, args.insecure)?;

    let index = cancellable(cancel, client.fetch_index(&args.reference)).await?;

    let Some(index) = index else {
        println!("No multi-architecture manifest found at {}", args.reference);
        return Ok(());
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&index)?);
        return Ok(());
    }

    let mut table = output::new_table(&["PLATFORM", "DIGEST", "SIZE"]);
    for entry in &index.manifests {
        let platform = entry
            .platform
            .as_ref()
            .map(|p| p.to_platform().to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            platform,
            output::short_digest(&entry.digest),
            entry.size.to_string(),
        ]);
    }
    println!("{table}");

    for (key, value) in &index.annotations {
        println!("{key}={value}");
    }
    Ok(())
}
