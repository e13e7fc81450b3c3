//! In-memory fakes of the builder and registry capabilities, for unit tests.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use strata_core::builder::{
    ClientConfig, ContainerBuilder, ContainerBuilderFactory, ImageBuilder, ImageBuilderFactory,
    MonitorConfig,
};
use strata_core::error::{Result, StrataError};
use strata_core::{BuildConfig, BuildOptions, BuildResult};

use crate::oci::digest::DigestFile;
use crate::oci::index::{Descriptor, ManifestList, OCI_IMAGE_MANIFEST_MEDIA_TYPE};
use crate::oci::provider::ManifestRegistry;

pub fn sha(c: char) -> String {
    format!("sha256:{}", c.to_string().repeat(64))
}

pub fn digest_file(architecture: &str, c: char) -> DigestFile {
    DigestFile {
        path: PathBuf::from(format!("digest-web-{}.txt", architecture.replace('/', "-"))),
        image_name: "web".to_string(),
        architecture: architecture.to_string(),
        digest: sha(c),
        modified: SystemTime::now(),
    }
}

fn track_peak(in_flight: &AtomicUsize, peak: &AtomicUsize) {
    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    peak.fetch_max(now, Ordering::SeqCst);
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Default)]
pub struct FakeRegistry {
    /// Digests that verification reports as absent
    pub missing: Mutex<Vec<String>>,
    /// Digests verified without `verify_delay`
    pub fast: Mutex<Vec<String>>,
    pub verify_delay: Duration,
    pub verified: Mutex<Vec<String>>,
    pub in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
    pub unhealthy: AtomicBool,

    /// Indexes currently published, by tag reference
    pub published: Mutex<BTreeMap<String, ManifestList>>,
    pub pushed: Mutex<Vec<String>>,
    /// Tag references whose push fails
    pub fail_push: Mutex<Vec<String>>,
    pub fail_fetch: AtomicBool,
    pub describe_calls: AtomicUsize,
    pub tags: Mutex<Vec<String>>,
}

impl FakeRegistry {
    pub fn publish(&self, reference: &str, index: ManifestList) {
        self.published
            .lock()
            .unwrap()
            .insert(reference.to_string(), index);
    }

    pub fn pushed(&self) -> Vec<String> {
        self.pushed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ManifestRegistry for FakeRegistry {
    async fn verify_digest(&self, reference: &str) -> Result<()> {
        let digest = reference.rsplit('@').next().unwrap_or_default().to_string();
        self.verified.lock().unwrap().push(reference.to_string());

        if !self.fast.lock().unwrap().contains(&digest) {
            track_peak(&self.in_flight, &self.peak_in_flight);
            tokio::time::sleep(self.verify_delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        if self.missing.lock().unwrap().contains(&digest) {
            return Err(StrataError::RegistryError {
                registry: "fake".to_string(),
                message: "manifest unknown".to_string(),
            });
        }
        Ok(())
    }

    async fn health_check(&self, registry: &str) -> Result<()> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(StrataError::RegistryError {
                registry: registry.to_string(),
                message: "status 503".to_string(),
            });
        }
        Ok(())
    }

    async fn describe(&self, reference: &str) -> Result<Descriptor> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        let digest = reference.rsplit('@').next().unwrap_or_default().to_string();
        Ok(Descriptor {
            media_type: OCI_IMAGE_MANIFEST_MEDIA_TYPE.to_string(),
            digest,
            size: 512,
        })
    }

    async fn fetch_index(&self, reference: &str) -> Result<Option<ManifestList>> {
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(StrataError::RegistryError {
                registry: "fake".to_string(),
                message: "connection reset".to_string(),
            });
        }
        Ok(self.published.lock().unwrap().get(reference).cloned())
    }

    async fn push_index(&self, reference: &str, index: &ManifestList) -> Result<String> {
        if self.fail_push.lock().unwrap().iter().any(|r| r == reference) {
            return Err(StrataError::RegistryError {
                registry: "fake".to_string(),
                message: "denied".to_string(),
            });
        }
        self.publish(reference, index.clone());
        self.pushed.lock().unwrap().push(reference.to_string());
        index.digest()
    }

    async fn list_tags(&self, _repository: &str) -> Result<Vec<String>> {
        Ok(self.tags.lock().unwrap().clone())
    }
}

// ============================================================================
// Cloud image builders
// ============================================================================

/// Shared behaviour and call log of fake cloud builders.
#[derive(Default)]
pub struct FakeCloud {
    pub fail_create: Vec<String>,
    pub fail_build: Vec<String>,
    pub fail_validate: Vec<String>,
    pub fail_copy: Vec<String>,
    pub fail_lookup: Vec<String>,
    pub delays: HashMap<String, Duration>,
    /// Images that already exist, by region
    pub existing: HashMap<String, String>,

    pub created: Mutex<Vec<Option<String>>>,
    pub built: Mutex<Vec<Option<String>>>,
    pub validated: Mutex<Vec<Option<String>>>,
    pub lookups: Mutex<Vec<(Option<String>, String)>>,
    pub copies: Mutex<Vec<(String, String)>>,
    pub closed: AtomicUsize,
}

impl FakeCloud {
    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct FakeImageBuilderFactory {
    pub cloud: Arc<FakeCloud>,
}

impl FakeImageBuilderFactory {
    pub fn new(cloud: FakeCloud) -> (Arc<Self>, Arc<FakeCloud>) {
        let cloud = Arc::new(cloud);
        (Arc::new(Self { cloud: cloud.clone() }), cloud)
    }
}

#[async_trait]
impl ImageBuilderFactory for FakeImageBuilderFactory {
    async fn create(
        &self,
        client: &ClientConfig,
        _monitor: &MonitorConfig,
    ) -> Result<Box<dyn ImageBuilder>> {
        let region = client.region.clone();
        if region
            .as_ref()
            .is_some_and(|r| self.cloud.fail_create.contains(r))
        {
            return Err(StrataError::BackendError {
                backend: "fake".to_string(),
                message: format!("no credentials for {:?}", region),
            });
        }
        self.cloud.created.lock().unwrap().push(region.clone());
        Ok(Box::new(FakeImageBuilder {
            region,
            cloud: self.cloud.clone(),
        }))
    }
}

pub struct FakeImageBuilder {
    region: Option<String>,
    cloud: Arc<FakeCloud>,
}

impl FakeImageBuilder {
    fn region_key(&self) -> String {
        self.region.clone().unwrap_or_default()
    }
}

#[async_trait]
impl ImageBuilder for FakeImageBuilder {
    async fn build(&self, _config: &BuildConfig, options: &BuildOptions) -> Result<BuildResult> {
        assert_eq!(options.region, self.region, "options and client region differ");
        if let Some(delay) = self.cloud.delays.get(&self.region_key()) {
            tokio::time::sleep(*delay).await;
        }
        self.cloud.built.lock().unwrap().push(self.region.clone());
        if self.cloud.fail_build.contains(&self.region_key()) {
            return Err(StrataError::BuildError(format!(
                "pipeline failed in {}",
                self.region_key()
            )));
        }
        Ok(BuildResult::machine_image(
            format!("ami-{}", self.region.as_deref().unwrap_or("default")),
            self.region.as_deref(),
        ))
    }

    async fn validate(&self, _config: &BuildConfig, _options: &BuildOptions) -> Result<()> {
        self.cloud.validated.lock().unwrap().push(self.region.clone());
        if self.cloud.fail_validate.contains(&self.region_key()) {
            return Err(StrataError::ConfigError("pipeline not found".to_string()));
        }
        Ok(())
    }

    async fn find_image(&self, name: &str) -> Result<Option<String>> {
        self.cloud
            .lookups
            .lock()
            .unwrap()
            .push((self.region.clone(), name.to_string()));
        if self.cloud.fail_lookup.contains(&self.region_key()) {
            return Err(StrataError::BackendError {
                backend: "fake".to_string(),
                message: "describe-images throttled".to_string(),
            });
        }
        Ok(self.cloud.existing.get(&self.region_key()).cloned())
    }

    async fn copy(
        &self,
        image_id: &str,
        source_region: &str,
        target_region: &str,
        _name: &str,
    ) -> Result<String> {
        assert_eq!(self.region.as_deref(), Some(target_region));
        self.cloud
            .copies
            .lock()
            .unwrap()
            .push((source_region.to_string(), target_region.to_string()));
        if self.cloud.fail_copy.iter().any(|r| r == target_region) {
            return Err(StrataError::BackendError {
                backend: "fake".to_string(),
                message: "copy quota exceeded".to_string(),
            });
        }
        Ok(format!("{}-{}", image_id, target_region))
    }

    async fn close(&self) -> Result<()> {
        self.cloud.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Container builders
// ============================================================================

#[derive(Default)]
pub struct FakeEngine {
    pub fail_platforms: Vec<String>,
    pub fail_push: Vec<String>,
    pub delay: Duration,
    pub fail_create: bool,

    pub built: Mutex<Vec<String>>,
    /// Extra tags requested per platform
    pub tagged: Mutex<Vec<(String, Vec<String>)>>,
    pub pushed: Mutex<Vec<(String, String)>>,
    pub in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
    pub closed: AtomicUsize,
}

pub struct FakeContainerFactory {
    pub engine: Arc<FakeEngine>,
}

impl FakeContainerFactory {
    pub fn new(engine: FakeEngine) -> (Arc<Self>, Arc<FakeEngine>) {
        let engine = Arc::new(engine);
        (
            Arc::new(Self {
                engine: engine.clone(),
            }),
            engine,
        )
    }
}

#[async_trait]
impl ContainerBuilderFactory for FakeContainerFactory {
    async fn create(&self) -> Result<Box<dyn ContainerBuilder>> {
        if self.engine.fail_create {
            return Err(StrataError::BackendError {
                backend: "fake".to_string(),
                message: "daemon not running".to_string(),
            });
        }
        Ok(Box::new(FakeContainerBuilder {
            engine: self.engine.clone(),
        }))
    }
}

pub struct FakeContainerBuilder {
    engine: Arc<FakeEngine>,
}

#[async_trait]
impl ContainerBuilder for FakeContainerBuilder {
    async fn build(&self, config: &BuildConfig, options: &BuildOptions) -> Result<BuildResult> {
        let platform = options.platform.clone().unwrap_or_default();
        track_peak(&self.engine.in_flight, &self.engine.peak_in_flight);
        tokio::time::sleep(self.engine.delay).await;
        self.engine.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.engine.built.lock().unwrap().push(platform.clone());
        self.engine
            .tagged
            .lock()
            .unwrap()
            .push((platform.clone(), options.tags.clone()));
        if self.engine.fail_platforms.contains(&platform) {
            return Err(StrataError::BuildError(format!("build failed for {}", platform)));
        }
        let arch = platform.trim_start_matches("linux/").to_string();
        Ok(BuildResult::container(format!("{}:{}", config.name, arch.replace('/', "-")))
            .with_platform(platform)
            .with_architecture(arch))
    }

    async fn push(&self, image_ref: &str, registry: &str) -> Result<String> {
        if self.engine.fail_push.iter().any(|r| r == image_ref) {
            return Err(StrataError::RegistryError {
                registry: registry.to_string(),
                message: "denied".to_string(),
            });
        }
        self.engine
            .pushed
            .lock()
            .unwrap()
            .push((image_ref.to_string(), registry.to_string()));
        let c = match image_ref.rsplit(':').next() {
            Some("amd64") => 'a',
            Some("arm64") => 'b',
            _ => 'c',
        };
        Ok(sha(c))
    }

    async fn close(&self) -> Result<()> {
        self.engine.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
