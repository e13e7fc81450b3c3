//! Multi-architecture container builds.
//!
//! One build per architecture runs through a single builder handle,
//! bounded by the configured concurrency. Results come back in the order
//! the architectures were requested.

use std::sync::Arc;
use std::time::Instant;

use strata_core::builder::{ContainerBuilder, ContainerBuilderFactory};
use strata_core::error::{Result, StrataError};
use strata_core::redact::redact_value;
use strata_core::{BuildConfig, BuildOptions, BuildResult};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::cancel::cancellable;
use crate::oci::digest::save_digest;
use crate::oci::platform::{encode_architecture, Platform};
use crate::oci::reference::qualify;

/// Builds (and optionally pushes) container images.
pub struct ContainerBuildService {
    factory: Arc<dyn ContainerBuilderFactory>,
    concurrency: usize,
    default_registry: Option<String>,
}

impl ContainerBuildService {
    pub fn new(factory: Arc<dyn ContainerBuilderFactory>, concurrency: usize) -> Self {
        Self {
            factory,
            concurrency: concurrency.max(1),
            default_registry: None,
        }
    }

    /// Registry used when neither the options nor the template name one.
    pub fn with_default_registry(mut self, registry: Option<String>) -> Self {
        self.default_registry = registry;
        self
    }

    pub async fn run(
        &self,
        config: &BuildConfig,
        opts: &BuildOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<BuildResult>> {
        let architectures = opts.resolve_architectures(config);
        let registry = opts.resolve_registry(config, self.default_registry.as_deref());
        let tags = opts.resolve_tags(config);
        let multi_arch = architectures.len() > 1;
        if opts.push && registry.is_none() {
            return Err(StrataError::ConfigError(
                "pushing requires a registry (use --registry, set it in the template or the global config)"
                    .to_string(),
            ));
        }

        for (key, value) in opts.build_args.iter() {
            tracing::debug!(arg = %key, value = %redact_value(key, value), "Build argument");
        }

        if opts.dry_run {
            for arch in &architectures {
                tracing::info!(
                    image = %config.name,
                    platform = %platform_for(arch),
                    tags = ?arch_tags(&tags, arch, multi_arch),
                    push = opts.push,
                    "Dry run: would build"
                );
            }
            return Ok(Vec::new());
        }

        let builder: Arc<dyn ContainerBuilder> =
            Arc::from(cancellable(cancel, self.factory.create()).await?);

        let outcome = async {
            let built = self
                .build_all(builder.clone(), config, opts, &architectures, &tags, cancel)
                .await?;
            match registry.as_deref() {
                Some(registry) if opts.push => {
                    self.push_all(&*builder, config, opts, built, &tags, registry, cancel)
                        .await
                }
                _ => Ok(built),
            }
        }
        .await;

        if let Err(e) = builder.close().await {
            tracing::warn!(error = %e, "Failed to close container builder");
        }
        outcome
    }

    async fn build_all(
        &self,
        builder: Arc<dyn ContainerBuilder>,
        config: &BuildConfig,
        opts: &BuildOptions,
        architectures: &[String],
        tags: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<BuildResult>> {
        tracing::info!(
            image = %config.name,
            architectures = %architectures.join(","),
            concurrency = self.concurrency,
            "Building container image"
        );

        let group = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let config = Arc::new(config.clone());
        let mut tasks = JoinSet::new();

        for (slot, arch) in architectures.iter().enumerate() {
            let builder = builder.clone();
            let semaphore = semaphore.clone();
            let group = group.clone();
            let config = config.clone();
            let platform = platform_for(arch);
            let mut platform_opts = opts.for_platform(&platform);
            platform_opts.tags = arch_tags(tags, arch, architectures.len() > 1);

            tasks.spawn(async move {
                let outcome = cancellable(&group, async {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .map_err(|_| StrataError::Cancelled)?;
                    let started = Instant::now();
                    let result = builder.build(&config, &platform_opts).await?;
                    Ok(result.with_duration(started.elapsed()))
                })
                .await;
                (slot, platform, outcome)
            });
        }

        let mut slots: Vec<Option<BuildResult>> =
            (0..architectures.len()).map(|_| None).collect();
        let mut first_error: Option<StrataError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, platform, Ok(result))) => {
                    tracing::info!(
                        platform = %platform,
                        image = %result.id,
                        "Platform build complete"
                    );
                    slots[slot] = Some(result);
                }
                Ok((_, _, Err(StrataError::Cancelled))) => {}
                Ok((_, platform, Err(e))) => {
                    if first_error.is_none() {
                        tracing::warn!(
                            platform = %platform,
                            error = %e,
                            "Platform build failed, cancelling the rest"
                        );
                        group.cancel();
                        first_error = Some(e);
                    }
                }
                Err(e) => {
                    if first_error.is_none() {
                        group.cancel();
                        first_error =
                            Some(StrataError::Other(format!("build task failed: {}", e)));
                    }
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(StrataError::Cancelled);
        }
        Ok(slots.into_iter().flatten().collect())
    }

    async fn push_all(
        &self,
        builder: &dyn ContainerBuilder,
        config: &BuildConfig,
        opts: &BuildOptions,
        built: Vec<BuildResult>,
        tags: &[String],
        registry: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<BuildResult>> {
        let multi_arch = built.len() > 1;
        let mut pushed = Vec::with_capacity(built.len());
        for result in built {
            let target = qualify(&result.id, registry);
            tracing::info!(image = %target, "Pushing image");
            let digest = cancellable(cancel, builder.push(&target, registry)).await?;

            let arch = result.architecture.clone().unwrap_or_default();
            if arch.is_empty() && (opts.save_digests || !tags.is_empty()) {
                return Err(StrataError::BuildError(format!(
                    "no architecture recorded for {}",
                    result.id
                )));
            }
            if opts.save_digests {
                save_digest(&config.name, &arch, &digest, &opts.digest_dir)?;
            }

            let mut result = result.with_digest(digest);
            result.id = target;
            for tag in arch_tags(tags, &arch, multi_arch) {
                let tagged = qualify(&format!("{}:{}", config.name, tag), registry);
                tracing::info!(image = %tagged, "Pushing tag");
                let tag_digest = cancellable(cancel, builder.push(&tagged, registry)).await?;
                tracing::debug!(image = %tagged, digest = %tag_digest, "Tag pushed");
                result = result.with_note(format!("tagged {}", tagged));
            }
            pushed.push(result);
        }
        Ok(pushed)
    }
}

/// Extra tags for one architecture's image.
///
/// Multi-architecture builds suffix each tag with the encoded architecture
/// (`v1` → `v1-arm-v7`); a single-architecture build uses the tags as given.
pub fn arch_tags(tags: &[String], architecture: &str, multi_arch: bool) -> Vec<String> {
    if !multi_arch {
        return tags.to_vec();
    }
    let arch = encode_architecture(&Platform::parse(architecture).arch_token());
    tags.iter().map(|t| format!("{}-{}", t, arch)).collect()
}

/// Build platform for an architecture token (`arm/v7` → `linux/arm/v7`).
pub fn platform_for(architecture: &str) -> String {
    if architecture.starts_with("linux/") || architecture.starts_with("windows/") {
        architecture.to_string()
    } else {
        format!("linux/{}", architecture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sha, FakeContainerFactory, FakeEngine};
    use strata_core::{Target, TARGET_CONTAINER};
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tempfile::TempDir;

    fn template() -> BuildConfig {
        BuildConfig {
            name: "web".to_string(),
            ..Default::default()
        }
    }

    fn options(archs: &[&str]) -> BuildOptions {
        BuildOptions {
            architectures: archs.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_platform_for() {
        assert_eq!(platform_for("amd64"), "linux/amd64");
        assert_eq!(platform_for("arm/v7"), "linux/arm/v7");
        assert_eq!(platform_for("linux/arm64"), "linux/arm64");
        assert_eq!(platform_for("windows/amd64"), "windows/amd64");
    }

    #[tokio::test]
    async fn test_results_in_request_order() {
        let (factory, engine) = FakeContainerFactory::new(FakeEngine {
            delay: Duration::from_millis(10),
            ..Default::default()
        });
        let service = ContainerBuildService::new(factory, 3);

        let results = service
            .run(&template(), &options(&["arm64", "amd64", "arm/v7"]), &CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["web:arm64", "web:amd64", "web:arm-v7"]);
        assert_eq!(results[2].platform.as_deref(), Some("linux/arm/v7"));
        assert_eq!(engine.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrency_bound() {
        let (factory, engine) = FakeContainerFactory::new(FakeEngine {
            delay: Duration::from_millis(20),
            ..Default::default()
        });
        let service = ContainerBuildService::new(factory, 2);

        service
            .run(
                &template(),
                &options(&["amd64", "arm64", "arm/v7", "ppc64le", "s390x"]),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(engine.built.lock().unwrap().len(), 5);
        assert!(engine.peak_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_failure_fails_the_set() {
        let (factory, engine) = FakeContainerFactory::new(FakeEngine {
            fail_platforms: vec!["linux/arm64".to_string()],
            ..Default::default()
        });
        let service = ContainerBuildService::new(factory, 2);

        let err = service
            .run(&template(), &options(&["amd64", "arm64"]), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StrataError::BuildError(_)));
        assert_eq!(engine.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_push_and_save_digests() {
        let dir = TempDir::new().unwrap();
        let (factory, engine) = FakeContainerFactory::new(FakeEngine::default());
        let service = ContainerBuildService::new(factory, 2);
        let opts = BuildOptions {
            registry: Some("ghcr.io/acme".to_string()),
            push: true,
            save_digests: true,
            digest_dir: dir.path().to_path_buf(),
            ..options(&["amd64", "arm64"])
        };

        let results = service
            .run(&template(), &opts, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results[0].id, "ghcr.io/acme/web:amd64");
        assert_eq!(results[0].digest.as_deref(), Some(sha('a').as_str()));
        assert_eq!(results[1].digest.as_deref(), Some(sha('b').as_str()));
        assert_eq!(engine.pushed.lock().unwrap().len(), 2);

        let saved = std::fs::read_to_string(dir.path().join("digest-web-arm64.txt")).unwrap();
        assert_eq!(saved.trim(), sha('b'));
    }

    #[test]
    fn test_arch_tags() {
        let tags = vec!["v1".to_string(), "stable".to_string()];
        assert_eq!(arch_tags(&tags, "amd64", false), vec!["v1", "stable"]);
        assert_eq!(arch_tags(&tags, "arm/v7", true), vec!["v1-arm-v7", "stable-arm-v7"]);
        assert_eq!(arch_tags(&tags, "linux/arm64", true), vec!["v1-arm64", "stable-arm64"]);
        assert!(arch_tags(&[], "amd64", true).is_empty());
    }

    #[tokio::test]
    async fn test_requested_tag_is_built_and_pushed() {
        let (factory, engine) = FakeContainerFactory::new(FakeEngine::default());
        let service = ContainerBuildService::new(factory, 1);
        let opts = BuildOptions {
            registry: Some("ghcr.io/acme".to_string()),
            tags: vec!["v1.2.3".to_string()],
            push: true,
            ..options(&["amd64"])
        };

        let results = service
            .run(&template(), &opts, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            *engine.tagged.lock().unwrap(),
            vec![("linux/amd64".to_string(), vec!["v1.2.3".to_string()])]
        );
        let pushed: Vec<String> =
            engine.pushed.lock().unwrap().iter().map(|(r, _)| r.clone()).collect();
        assert_eq!(pushed, vec!["ghcr.io/acme/web:amd64", "ghcr.io/acme/web:v1.2.3"]);
        assert_eq!(results[0].id, "ghcr.io/acme/web:amd64");
        assert_eq!(results[0].digest.as_deref(), Some(sha('a').as_str()));
        assert!(results[0].notes.contains(&"tagged ghcr.io/acme/web:v1.2.3".to_string()));
    }

    #[tokio::test]
    async fn test_template_tags_are_suffixed_per_architecture() {
        let (factory, engine) = FakeContainerFactory::new(FakeEngine::default());
        let service = ContainerBuildService::new(factory, 2);
        let config = BuildConfig {
            targets: vec![Target {
                kind: TARGET_CONTAINER.to_string(),
                registry: Some("ghcr.io/acme".to_string()),
                tags: vec!["stable".to_string()],
                ..Default::default()
            }],
            ..template()
        };
        let opts = BuildOptions {
            push: true,
            ..options(&["amd64", "arm64"])
        };

        service
            .run(&config, &opts, &CancellationToken::new())
            .await
            .unwrap();

        let mut pushed: Vec<String> =
            engine.pushed.lock().unwrap().iter().map(|(r, _)| r.clone()).collect();
        pushed.sort();
        assert_eq!(
            pushed,
            vec![
                "ghcr.io/acme/web:amd64",
                "ghcr.io/acme/web:arm64",
                "ghcr.io/acme/web:stable-amd64",
                "ghcr.io/acme/web:stable-arm64",
            ]
        );
    }

    #[tokio::test]
    async fn test_push_without_registry_is_config_error() {
        let (factory, engine) = FakeContainerFactory::new(FakeEngine::default());
        let service = ContainerBuildService::new(factory, 2);
        let opts = BuildOptions {
            push: true,
            ..options(&["amd64"])
        };

        let err = service
            .run(&template(), &opts, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StrataError::ConfigError(_)));
        assert!(engine.built.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_default_registry_fallback() {
        let (factory, engine) = FakeContainerFactory::new(FakeEngine::default());
        let service = ContainerBuildService::new(factory, 1)
            .with_default_registry(Some("registry.local:5000".to_string()));
        let opts = BuildOptions {
            push: true,
            ..options(&["amd64"])
        };

        let results = service
            .run(&template(), &opts, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results[0].id, "registry.local:5000/web:amd64");
        assert_eq!(
            engine.pushed.lock().unwrap()[0].1,
            "registry.local:5000".to_string()
        );
    }

    #[tokio::test]
    async fn test_dry_run_builds_nothing() {
        let (factory, engine) = FakeContainerFactory::new(FakeEngine::default());
        let service = ContainerBuildService::new(factory, 2);
        let opts = BuildOptions {
            dry_run: true,
            ..options(&["amd64", "arm64"])
        };

        let results = service
            .run(&template(), &opts, &CancellationToken::new())
            .await
            .unwrap();

        assert!(results.is_empty());
        assert!(engine.built.lock().unwrap().is_empty());
        assert_eq!(engine.closed.load(Ordering::SeqCst), 0);
    }
}
