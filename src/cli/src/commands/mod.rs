//! CLI command definitions and dispatch.

mod build;
mod manifest_create;
mod manifest_inspect;
mod manifest_list;
mod version;

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use strata_core::StrataConfig;
use tokio_util::sync::CancellationToken;

pub use build::BuildArgs;
pub use manifest_create::CreateArgs;
pub use manifest_inspect::InspectArgs;
pub use manifest_list::ListArgs;

/// Strata - multi-architecture image builds and manifest publishing.
#[derive(Parser)]
#[command(name = "strata", version, about)]
pub struct Cli {
    /// Global config file (default: ~/.config/strata/config.yaml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Log level used when `RUST_LOG` is not set.
    pub fn default_log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "warn"
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Build container or machine images from a template
    Build(BuildArgs),
    /// Create and inspect multi-architecture manifests
    #[command(subcommand)]
    Manifests(ManifestsCommand),
    /// Show version information
    Version(version::VersionArgs),
}

#[derive(Subcommand)]
pub enum ManifestsCommand {
    /// Assemble digest files into a multi-architecture manifest and push it
    Create(CreateArgs),
    /// Show the platforms of a published manifest
    Inspect(InspectArgs),
    /// List the tags of a repository
    List(ListArgs),
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(
    cli: Cli,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = StrataConfig::load(cli.config.as_deref())?;
    tracing::debug!(config = ?config, "Loaded configuration");

    match cli.command {
        Command::Build(args) => build::execute(args, &config, &cancel).await,
        Command::Manifests(ManifestsCommand::Create(args)) => {
            manifest_create::execute(args, &config, &cancel).await
        }
        Command::Manifests(ManifestsCommand::Inspect(args)) => {
            manifest_inspect::execute(args, &config, &cancel).await
        }
        Command::Manifests(ManifestsCommand::List(args)) => {
            manifest_list::execute(args, &config, &cancel).await
        }
        Command::Version(args) => version::execute(args).await,
    }
}

/// Parse KEY=VALUE pairs into a map; later keys win.
pub(crate) fn parse_key_values(
    pairs: &[String],
    what: &str,
) -> Result<BTreeMap<String, String>, String> {
    let mut map = BTreeMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("Invalid {what} (expected KEY=VALUE): {pair}"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("Invalid {what} (empty key): {pair}"));
        }
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}
