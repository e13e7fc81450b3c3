//! Strata Runtime - build orchestration.
//!
//! Routes builds to the container or machine image backend, fans machine
//! image builds out over regions, and assembles per-architecture digests
//! into published multi-architecture image indexes.

#![allow(clippy::result_large_err)]

pub mod backend;
pub mod cancel;
pub mod container;
pub mod dispatch;
pub mod oci;
pub mod region;
pub mod report;

#[cfg(test)]
pub(crate) mod testing;

// Re-export common types
pub use backend::{AwsCliFactory, BuildxFactory};
pub use cancel::cancellable;
pub use container::ContainerBuildService;
pub use dispatch::{determine_target_type, DispatchOutcome, TargetDispatcher};
pub use oci::{
    AssembleOptions, AssembleOutcome, DigestFile, ManifestAssembler, ManifestRegistry,
    RegistryAuth, RegistryClient, RepositoryRef,
};
pub use region::{resolve_regions, RegionFanOut, Replication, Replicator};
pub use report::BuildReport;

/// Strata Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
