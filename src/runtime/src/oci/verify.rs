//! Registry verification of discovered digests.
//!
//! Each digest is looked up by digest reference with bounded concurrency.
//! The first failure cancels the verifications still in flight; the caller
//! gets an error naming the offending architecture and digest.

use std::sync::Arc;

use strata_core::config::{DEFAULT_VERIFY_CONCURRENCY, MAX_VERIFY_CONCURRENCY};
use strata_core::error::{Result, StrataError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::digest::DigestFile;
use super::provider::ManifestRegistry;
use super::reference::RepositoryRef;
use crate::cancel::cancellable;

/// Verification worker count: command line > config > default, clamped to the maximum.
pub fn resolve_concurrency(cli: Option<usize>, config: Option<usize>) -> usize {
    let requested = cli
        .filter(|n| *n > 0)
        .or(config.filter(|n| *n > 0))
        .unwrap_or(DEFAULT_VERIFY_CONCURRENCY);
    if requested > MAX_VERIFY_CONCURRENCY {
        tracing::warn!(
            requested,
            max = MAX_VERIFY_CONCURRENCY,
            "Verification concurrency clamped"
        );
    }
    requested.min(MAX_VERIFY_CONCURRENCY)
}

/// Run the registry health check unless cancelled.
pub async fn check_registry_health(
    registry: &dyn ManifestRegistry,
    host: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    tracing::info!(registry = %host, "Checking registry health");
    cancellable(cancel, registry.health_check(host)).await
}

/// Confirm every digest exists in `repository`.
pub async fn verify_digests(
    registry: Arc<dyn ManifestRegistry>,
    files: &[DigestFile],
    repository: &RepositoryRef,
    concurrency: usize,
    cancel: &CancellationToken,
) -> Result<()> {
    if files.is_empty() {
        return Ok(());
    }

    let workers = concurrency.clamp(1, MAX_VERIFY_CONCURRENCY);
    tracing::info!(
        count = files.len(),
        concurrency = workers,
        repository = %repository,
        "Verifying digests in registry"
    );

    let semaphore = Arc::new(Semaphore::new(workers));
    let group = cancel.child_token();
    let mut tasks = JoinSet::new();

    for file in files {
        let registry = registry.clone();
        let semaphore = semaphore.clone();
        let group = group.clone();
        let reference = repository.by_digest(&file.digest);
        let architecture = file.architecture.clone();
        let digest = file.digest.clone();

        tasks.spawn(async move {
            let outcome = cancellable(&group, async {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| StrataError::Cancelled)?;
                registry.verify_digest(&reference).await
            })
            .await;
            (architecture, digest, outcome)
        });
    }

    let mut first_error: Option<StrataError> = None;
    while let Some(joined) = tasks.join_next().await {
        let failure = match joined {
            Ok((architecture, digest, Ok(()))) => {
                tracing::debug!(%architecture, %digest, "Digest verified");
                continue;
            }
            Ok((_, _, Err(StrataError::Cancelled))) => continue,
            Ok((architecture, digest, Err(e))) => StrataError::VerificationFailed {
                architecture,
                digest,
                message: e.to_string(),
            },
            Err(e) => StrataError::Other(format!("verification task failed: {}", e)),
        };
        if first_error.is_none() {
            tracing::warn!(error = %failure, "Verification failed, cancelling remaining checks");
            group.cancel();
            first_error = Some(failure);
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }
    if cancel.is_cancelled() {
        return Err(StrataError::Cancelled);
    }

    tracing::info!(count = files.len(), "All digests verified");
    Ok(())
}
