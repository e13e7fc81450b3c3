//! ManifestRegistry - capability surface of a container registry.

use async_trait::async_trait;
use strata_core::error::Result;

use super::index::{Descriptor, ManifestList};

/// Registry operations used by manifest verification and assembly.
///
/// References are full strings (`registry/namespace/image:tag` or
/// `registry/namespace/image@sha256:...`).
#[async_trait]
pub trait ManifestRegistry: Send + Sync {
    /// Confirm a manifest exists at `reference`.
    async fn verify_digest(&self, reference: &str) -> Result<()>;

    /// Fast reachability check of a registry host.
    async fn health_check(&self, registry: &str) -> Result<()>;

    /// Media type, digest and size of the manifest at `reference`.
    async fn describe(&self, reference: &str) -> Result<Descriptor>;

    /// Index currently published at `reference`, if any.
    ///
    /// `Ok(None)` when nothing is published there or the tag points at a
    /// single-platform manifest.
    async fn fetch_index(&self, reference: &str) -> Result<Option<ManifestList>>;

    /// Publish `index` at `reference`, returning the `sha256:` digest of the pushed index.
    async fn push_index(&self, reference: &str, index: &ManifestList) -> Result<String>;

    /// Tags of `repository`.
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>>;
}
