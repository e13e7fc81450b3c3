//! Cross-region copies of machine images.

use std::sync::Arc;

use strata_core::builder::{ClientConfig, ImageBuilderFactory, MonitorConfig};
use strata_core::error::StrataError;
use strata_core::BuildResult;
use tokio_util::sync::CancellationToken;

use crate::cancel::cancellable;

/// Copies that completed, plus the aggregate error when any copy failed.
#[derive(Debug, Default)]
pub struct Replication {
    pub results: Vec<BuildResult>,
    pub error: Option<StrataError>,
}

impl Replication {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Copies a machine image into additional regions, one client per target.
pub struct Replicator {
    factory: Arc<dyn ImageBuilderFactory>,
    client: ClientConfig,
    monitor: MonitorConfig,
}

impl Replicator {
    pub fn new(
        factory: Arc<dyn ImageBuilderFactory>,
        client: ClientConfig,
        monitor: MonitorConfig,
    ) -> Self {
        Self {
            factory,
            client,
            monitor,
        }
    }

    /// Copy `image_id` from `source_region` into every region of `targets`.
    ///
    /// The source region and repeated targets are skipped. A failed copy
    /// does not stop the remaining ones.
    pub async fn replicate(
        &self,
        image_id: &str,
        source_region: &str,
        targets: &[String],
        name: &str,
        cancel: &CancellationToken,
    ) -> Replication {
        let mut seen: Vec<&str> = Vec::new();
        let mut results = Vec::new();
        let mut failures = Vec::new();

        for target in targets {
            let target = target.trim();
            if target.is_empty() || seen.contains(&target) {
                continue;
            }
            seen.push(target);
            if target == source_region {
                tracing::debug!(region = %target, "Skipping copy into source region");
                continue;
            }

            match self
                .copy_one(image_id, source_region, target, name, cancel)
                .await
            {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::warn!(
                        image = %image_id,
                        region = %target,
                        error = %e,
                        "Region copy failed"
                    );
                    failures.push(format!("{}: {}", target, e));
                }
            }
        }

        let attempted = results.len() + failures.len();
        let error = (!failures.is_empty()).then(|| StrataError::RegionCopiesFailed {
            failed: failures.len(),
            total: attempted,
            details: failures,
        });
        Replication { results, error }
    }

    async fn copy_one(
        &self,
        image_id: &str,
        source_region: &str,
        target: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> strata_core::Result<BuildResult> {
        let client = self.client.for_region(Some(target));
        let builder = cancellable(cancel, self.factory.create(&client, &self.monitor)).await?;

        tracing::info!(
            image = %image_id,
            source = %source_region,
            target = %target,
            "Copying image"
        );
        let copied = cancellable(
            cancel,
            builder.copy(image_id, source_region, target, name),
        )
        .await;

        if let Err(e) = builder.close().await {
            tracing::warn!(region = %target, error = %e, "Failed to close builder");
        }

        let new_id = copied?;
        tracing::info!(image = %new_id, region = %target, "Image copied");
        Ok(BuildResult::machine_image(new_id, Some(target))
            .with_note(format!("copied from region {}", source_region)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCloud, FakeImageBuilderFactory};

    fn replicator(cloud: FakeCloud) -> (Replicator, Arc<FakeCloud>) {
        let (factory, cloud) = FakeImageBuilderFactory::new(cloud);
        (
            Replicator::new(factory, ClientConfig::default(), MonitorConfig::default()),
            cloud,
        )
    }

    fn regions(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_copies_to_each_target() {
        let (replicator, cloud) = replicator(FakeCloud::default());

        let out = replicator
            .replicate(
                "ami-1",
                "us-east-1",
                &regions(&["us-west-2", "eu-west-1"]),
                "web",
                &CancellationToken::new(),
            )
            .await;

        assert!(out.is_ok());
        let ids: Vec<&str> = out.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["ami-1-us-west-2", "ami-1-eu-west-1"]);
        assert_eq!(out.results[0].region.as_deref(), Some("us-west-2"));
        assert_eq!(out.results[0].notes, vec!["copied from region us-east-1"]);
        assert_eq!(cloud.closed_count(), 2);
    }

    #[tokio::test]
    async fn test_only_source_region_is_noop() {
        let (replicator, cloud) = replicator(FakeCloud::default());

        let out = replicator
            .replicate(
                "ami-1",
                "us-east-1",
                &regions(&["us-east-1"]),
                "web",
                &CancellationToken::new(),
            )
            .await;

        assert!(out.results.is_empty());
        assert!(out.error.is_none());
        assert_eq!(cloud.created_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_keeps_other_copies() {
        let (replicator, cloud) = replicator(FakeCloud {
            fail_copy: vec!["us-west-2".to_string()],
            fail_create: vec!["ap-south-1".to_string()],
            ..Default::default()
        });

        let out = replicator
            .replicate(
                "ami-1",
                "us-east-1",
                &regions(&["us-west-2", "us-east-1", "eu-west-1", "ap-south-1", "eu-west-1"]),
                "web",
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(out.results.len(), 1);
        assert_eq!(out.results[0].id, "ami-1-eu-west-1");
        match out.error {
            Some(StrataError::RegionCopiesFailed {
                failed,
                total,
                details,
            }) => {
                assert_eq!((failed, total), (2, 3));
                assert!(details[0].starts_with("us-west-2: "));
                assert!(details[1].starts_with("ap-south-1: "));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // The builder is closed even when its copy fails.
        assert_eq!(cloud.closed_count(), 2);
    }
}
