//! Multi-architecture manifest assembly.
//!
//! One OCI index is published per requested tag. Pushes are not atomic across
//! tags: a failed tag is recorded and the remaining tags are still attempted,
//! and earlier successful pushes stay published.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use strata_core::error::{Result, StrataError};
use tokio_util::sync::CancellationToken;

use super::digest::DigestFile;
use super::index::ManifestList;
use super::platform::Platform;
use super::provider::ManifestRegistry;
use super::reference::RepositoryRef;
use crate::cancel::cancellable;

/// Prefix applied to label keys when they become index annotations.
pub const LABEL_ANNOTATION_PREFIX: &str = "org.opencontainers.image.";

/// Platform-resolved, digest-addressed manifest reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// `registry/namespace/image@digest`
    pub image_ref: String,
    pub digest: String,
    pub os: String,
    pub architecture: String,
    pub variant: Option<String>,
    /// `os/architecture[/variant]`
    pub platform: String,
}

impl ManifestEntry {
    /// Derive an entry from a digest file.
    pub fn from_digest_file(file: &DigestFile, repository: &RepositoryRef) -> Self {
        let platform = Platform::parse(&file.architecture);
        Self {
            image_ref: repository.by_digest(&file.digest),
            digest: file.digest.clone(),
            platform: platform.to_string(),
            os: platform.os,
            architecture: platform.architecture,
            variant: platform.variant,
        }
    }

    pub fn to_platform(&self) -> Platform {
        Platform {
            os: self.os.clone(),
            architecture: self.architecture.clone(),
            variant: self.variant.clone(),
        }
    }
}

/// Entries for every digest file, in input order.
pub fn entries_from_digests(
    files: &[DigestFile],
    repository: &RepositoryRef,
) -> Vec<ManifestEntry> {
    files
        .iter()
        .map(|file| ManifestEntry::from_digest_file(file, repository))
        .collect()
}

/// Assembly settings.
#[derive(Debug, Clone, Default)]
pub struct AssembleOptions {
    pub tags: Vec<String>,
    pub annotations: BTreeMap<String, String>,
    /// Labels, published as `org.opencontainers.image.<key>` annotations
    pub labels: BTreeMap<String, String>,
    /// Skip the idempotency check
    pub force: bool,
    /// Report what would be pushed without writing
    pub dry_run: bool,
}

impl AssembleOptions {
    /// Index annotations: explicit annotations plus prefixed labels.
    pub fn index_annotations(&self) -> BTreeMap<String, String> {
        let mut annotations = self.annotations.clone();
        for (key, value) in &self.labels {
            let key = if key.starts_with("org.opencontainers.") {
                key.clone()
            } else {
                format!("{}{}", LABEL_ANNOTATION_PREFIX, key)
            };
            annotations.entry(key).or_insert_with(|| value.clone());
        }
        annotations
    }
}

/// Manifest that would be pushed for one tag.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedManifest {
    pub tag: String,
    pub reference: String,
    pub entries: Vec<ManifestEntry>,
}

/// Manifest pushed for one tag.
#[derive(Debug, Clone, PartialEq)]
pub struct PushedManifest {
    pub tag: String,
    pub reference: String,
    pub digest: String,
}

/// Outcome of an assembly run.
#[derive(Debug, Clone, PartialEq)]
pub enum AssembleOutcome {
    /// Every tag already references the same platform/digest set
    UpToDate(Vec<String>),
    /// Dry run, nothing written
    DryRun(Vec<PlannedManifest>),
    /// Every tag pushed
    Pushed(Vec<PushedManifest>),
}

/// Builds and publishes multi-architecture indexes.
pub struct ManifestAssembler {
    registry: Arc<dyn ManifestRegistry>,
}

impl ManifestAssembler {
    pub fn new(registry: Arc<dyn ManifestRegistry>) -> Self {
        Self { registry }
    }

    /// Create and push one index per tag.
    pub async fn assemble(
        &self,
        repository: &RepositoryRef,
        files: &[DigestFile],
        opts: &AssembleOptions,
        cancel: &CancellationToken,
    ) -> Result<AssembleOutcome> {
        if opts.tags.is_empty() {
            return Err(StrataError::ConfigError(
                "at least one tag is required".to_string(),
            ));
        }
        if files.is_empty() {
            return Err(StrataError::NoArchitectures);
        }

        let entries = entries_from_digests(files, repository);

        if !opts.force && self.is_current(repository, &entries, opts, cancel).await {
            tracing::info!(
                repository = %repository,
                tags = ?opts.tags,
                "Manifest already up to date, skipping push"
            );
            let references = opts.tags.iter().map(|t| repository.tagged(t)).collect();
            return Ok(AssembleOutcome::UpToDate(references));
        }

        if opts.dry_run {
            let plans: Vec<PlannedManifest> = opts
                .tags
                .iter()
                .map(|tag| PlannedManifest {
                    tag: tag.clone(),
                    reference: repository.tagged(tag),
                    entries: entries.clone(),
                })
                .collect();
            for plan in &plans {
                let platforms: Vec<&str> =
                    plan.entries.iter().map(|e| e.platform.as_str()).collect();
                tracing::info!(
                    reference = %plan.reference,
                    platforms = ?platforms,
                    "Dry run: would create manifest"
                );
            }
            return Ok(AssembleOutcome::DryRun(plans));
        }

        let index = self.build_index(&entries, opts, cancel).await?;

        let mut pushed: Vec<PushedManifest> = Vec::new();
        let mut failed: Vec<(String, StrataError)> = Vec::new();
        for tag in &opts.tags {
            let reference = repository.tagged(tag);
            tracing::info!(
                reference = %reference,
                architectures = entries.len(),
                "Pushing manifest"
            );
            match cancellable(cancel, self.registry.push_index(&reference, &index)).await {
                Ok(digest) => {
                    tracing::info!(reference = %reference, digest = %digest, "Manifest pushed");
                    pushed.push(PushedManifest {
                        tag: tag.clone(),
                        reference,
                        digest,
                    });
                }
                Err(e) => {
                    tracing::error!(reference = %reference, error = %e, "Failed to push manifest");
                    failed.push((tag.clone(), e));
                }
            }
        }

        if !failed.is_empty() {
            let succeeded: Vec<&str> = pushed.iter().map(|p| p.tag.as_str()).collect();
            let failed_tags: Vec<String> = failed.iter().map(|(t, _)| t.clone()).collect();
            tracing::warn!(
                succeeded = ?succeeded,
                failed = ?failed_tags,
                "Manifest push incomplete"
            );
            return Err(StrataError::ManifestPushFailed {
                failed: failed_tags.len(),
                total: opts.tags.len(),
                tags: failed_tags,
            });
        }

        Ok(AssembleOutcome::Pushed(pushed))
    }

    /// True when every tag already publishes exactly these entries with
    /// the same index annotations.
    ///
    /// Lookup failures count as "not current".
    async fn is_current(
        &self,
        repository: &RepositoryRef,
        entries: &[ManifestEntry],
        opts: &AssembleOptions,
        cancel: &CancellationToken,
    ) -> bool {
        let expected: BTreeSet<(String, String)> = entries
            .iter()
            .map(|e| (e.platform.clone(), e.digest.clone()))
            .collect();
        let annotations = opts.index_annotations();

        for tag in &opts.tags {
            let reference = repository.tagged(tag);
            match cancellable(cancel, self.registry.fetch_index(&reference)).await {
                Ok(Some(existing)) if existing.platform_digests() != expected => {
                    tracing::debug!(reference = %reference, "Existing manifest differs");
                    return false;
                }
                Ok(Some(existing)) if existing.annotations != annotations => {
                    tracing::debug!(
                        reference = %reference,
                        "Existing manifest annotations differ"
                    );
                    return false;
                }
                Ok(Some(_)) => {
                    tracing::debug!(reference = %reference, "Existing manifest matches");
                }
                Ok(None) => {
                    tracing::debug!(reference = %reference, "No existing manifest");
                    return false;
                }
                Err(e) => {
                    tracing::warn!(
                        reference = %reference,
                        error = %e,
                        "Could not check existing manifest, assuming it is stale"
                    );
                    return false;
                }
            }
        }
        true
    }

    /// Index referencing every entry by digest.
    async fn build_index(
        &self,
        entries: &[ManifestEntry],
        opts: &AssembleOptions,
        cancel: &CancellationToken,
    ) -> Result<ManifestList> {
        let mut index = ManifestList::new();
        let mut described = HashMap::new();
        for entry in entries {
            let descriptor = match described.get(&entry.digest).cloned() {
                Some(descriptor) => descriptor,
                None => {
                    let descriptor = cancellable(cancel, self.registry.describe(&entry.image_ref))
                        .await?;
                    described.insert(entry.digest.clone(), descriptor.clone());
                    descriptor
                }
            };
            index.push(descriptor, &entry.to_platform());
        }
        index.annotations = opts.index_annotations();
        Ok(index)
    }
}
