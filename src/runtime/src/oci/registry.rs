//! OCI registry client for manifest verification and index publishing.
//!
//! Uses the `oci-distribution` crate to talk to container registries
//! (Docker Hub, GHCR, ECR, ...). Health checks go straight to the
//! `/v2/` endpoint with `reqwest`.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::errors::OciDistributionError;
use oci_distribution::manifest::{OciImageIndex, OciManifest};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference};
use strata_core::error::{Result, StrataError};

use super::credentials::CredentialStore;
use super::digest::parse_digest;
use super::index::{
    Descriptor, ManifestList, DOCKER_MANIFEST_LIST_MEDIA_TYPE, DOCKER_MANIFEST_MEDIA_TYPE,
    OCI_IMAGE_INDEX_MEDIA_TYPE, OCI_IMAGE_MANIFEST_MEDIA_TYPE,
};
use super::provider::ManifestRegistry;
use super::reference::registry_host;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Manifest media types accepted when describing a single-platform manifest.
const SINGLE_MANIFEST_TYPES: &[&str] = &[OCI_IMAGE_MANIFEST_MEDIA_TYPE, DOCKER_MANIFEST_MEDIA_TYPE];

/// Authentication credentials for a container registry.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Create authentication from `REGISTRY_USERNAME` / `REGISTRY_PASSWORD`.
    pub fn from_env() -> Option<Self> {
        let username = std::env::var("REGISTRY_USERNAME").ok()?;
        let password = std::env::var("REGISTRY_PASSWORD").ok()?;
        Some(Self::basic(username, password))
    }

    /// Resolve credentials for `registry`: credential file, then environment,
    /// then anonymous.
    pub fn resolve(registry: &str, auth_file: Option<&Path>) -> Result<Self> {
        let host = registry_host(registry);
        let store = match auth_file {
            Some(path) => Some(CredentialStore::new(path)),
            None => CredentialStore::default_location(),
        };
        if let Some(store) = store {
            if let Some((username, password)) = store.get(host)? {
                tracing::debug!(
                    registry = %host,
                    source = %store.path().display(),
                    "Using stored registry credentials"
                );
                return Ok(Self::basic(username, password));
            }
        }
        Ok(Self::from_env().unwrap_or_else(Self::anonymous))
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    /// Convert to oci-distribution auth type.
    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Registry client implementing [`ManifestRegistry`].
pub struct RegistryClient {
    client: Client,
    http: reqwest::Client,
    auth: RegistryAuth,
    insecure: bool,
}

impl RegistryClient {
    /// Create a client. `insecure` talks plain HTTP (local registries).
    pub fn new(auth: RegistryAuth, insecure: bool) -> Result<Self> {
        let config = ClientConfig {
            protocol: if insecure {
                ClientProtocol::Http
            } else {
                ClientProtocol::Https
            },
            ..Default::default()
        };
        let http = reqwest::Client::builder()
            .timeout(HEALTH_CHECK_TIMEOUT)
            .build()
            .map_err(|e| StrataError::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client: Client::new(config),
            http,
            auth,
            insecure,
        })
    }

    fn registry_error(reference: &str, action: &str, err: impl std::fmt::Display) -> StrataError {
        StrataError::RegistryError {
            registry: registry_host(reference).to_string(),
            message: format!("{} {}: {}", action, reference, err),
        }
    }

    fn parse_reference(reference: &str) -> Result<Reference> {
        reference.parse::<Reference>().map_err(|e| {
            Self::registry_error(reference, "invalid reference", e)
        })
    }

    fn health_url(&self, host: &str) -> String {
        let scheme = if self.insecure { "http" } else { "https" };
        let host = match host {
            "docker.io" | "index.docker.io" => "registry-1.docker.io",
            other => other,
        };
        format!("{}://{}/v2/", scheme, host)
    }
}

fn is_not_found(err: &OciDistributionError) -> bool {
    matches!(err, OciDistributionError::ImageManifestNotFoundError(_))
        || err.to_string().to_lowercase().contains("manifest unknown")
}

#[async_trait]
impl ManifestRegistry for RegistryClient {
    async fn verify_digest(&self, reference: &str) -> Result<()> {
        let oci_ref = Self::parse_reference(reference)?;
        let digest = self
            .client
            .fetch_manifest_digest(&oci_ref, &self.auth.to_oci_auth())
            .await
            .map_err(|e| Self::registry_error(reference, "failed to fetch manifest", e))?;

        if let Some(expected) = oci_ref.digest() {
            if expected != digest {
                return Err(Self::registry_error(
                    reference,
                    "digest mismatch for",
                    format!("registry returned {}", digest),
                ));
            }
        }
        tracing::debug!(reference = %reference, "Manifest exists");
        Ok(())
    }

    async fn health_check(&self, registry: &str) -> Result<()> {
        let url = self.health_url(registry_host(registry));
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::registry_error(registry, "health check failed for", e))?;

        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::UNAUTHORIZED {
            tracing::debug!(url = %url, status = %status, "Registry is healthy");
            Ok(())
        } else {
            Err(Self::registry_error(
                registry,
                "health check failed for",
                format!("unexpected status {}", status),
            ))
        }
    }

    async fn describe(&self, reference: &str) -> Result<Descriptor> {
        let oci_ref = Self::parse_reference(reference)?;
        let (body, digest) = self
            .client
            .pull_manifest_raw(&oci_ref, &self.auth.to_oci_auth(), SINGLE_MANIFEST_TYPES)
            .await
            .map_err(|e| Self::registry_error(reference, "failed to pull manifest", e))?;

        let value: serde_json::Value = serde_json::from_slice(&body)?;
        let media_type = value
            .get("mediaType")
            .and_then(|m| m.as_str())
            .unwrap_or(OCI_IMAGE_MANIFEST_MEDIA_TYPE)
            .to_string();
        if media_type == OCI_IMAGE_INDEX_MEDIA_TYPE || media_type == DOCKER_MANIFEST_LIST_MEDIA_TYPE
        {
            return Err(Self::registry_error(
                reference,
                "expected a single-platform manifest at",
                format!("found {}", media_type),
            ));
        }

        Ok(Descriptor {
            media_type,
            digest,
            size: body.len() as i64,
        })
    }

    async fn fetch_index(&self, reference: &str) -> Result<Option<ManifestList>> {
        let oci_ref = Self::parse_reference(reference)?;
        match self
            .client
            .pull_manifest(&oci_ref, &self.auth.to_oci_auth())
            .await
        {
            Ok((OciManifest::ImageIndex(index), _digest)) => {
                let list: ManifestList = serde_json::from_value(serde_json::to_value(&index)?)?;
                Ok(Some(list))
            }
            Ok((OciManifest::Image(_), _digest)) => Ok(None),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(Self::registry_error(reference, "failed to fetch index", e)),
        }
    }

    async fn push_index(&self, reference: &str, index: &ManifestList) -> Result<String> {
        let oci_ref = Self::parse_reference(reference)?;
        let oci_index: OciImageIndex = serde_json::from_value(serde_json::to_value(index)?)?;
        let url = self
            .client
            .push_manifest_list(&oci_ref, &self.auth.to_oci_auth(), oci_index)
            .await
            .map_err(|e| Self::registry_error(reference, "failed to push index", e))?;

        if let Some(digest) = digest_from_manifest_url(&url) {
            return Ok(digest);
        }
        tracing::debug!(url = %url, "Push location carries no digest, asking the registry");
        self.client
            .fetch_manifest_digest(&oci_ref, &self.auth.to_oci_auth())
            .await
            .map_err(|e| Self::registry_error(reference, "failed to resolve pushed index", e))
    }

    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let oci_ref = Self::parse_reference(repository)?;
        let response = self
            .client
            .list_tags(&oci_ref, &self.auth.to_oci_auth(), None, None)
            .await
            .map_err(|e| Self::registry_error(repository, "failed to list tags", e))?;
        let mut tags = response.tags;
        tags.sort();
        Ok(tags)
    }
}

/// Digest at the end of a pushed manifest URL (`.../manifests/sha256:...`).
fn digest_from_manifest_url(url: &str) -> Option<String> {
    let last = url.trim_end_matches('/').rsplit('/').next()?;
    parse_digest(last).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_registry_auth_anonymous() {
        let auth = RegistryAuth::anonymous();
        assert!(auth.is_anonymous());
        assert!(matches!(auth.to_oci_auth(), OciRegistryAuth::Anonymous));
    }

    #[test]
    fn test_registry_auth_basic() {
        let auth = RegistryAuth::basic("user", "pass");
        assert!(!auth.is_anonymous());
        assert!(matches!(auth.to_oci_auth(), OciRegistryAuth::Basic(_, _)));
    }

    #[test]
    fn test_resolve_from_auth_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(
            &path,
            r#"{"registries":{"ghcr.io":{"username":"bot","password":"pw"}}}"#,
        )
        .unwrap();

        let auth = RegistryAuth::resolve("ghcr.io/acme", Some(&path)).unwrap();
        assert_eq!(auth.username.as_deref(), Some("bot"));
        assert_eq!(auth.password.as_deref(), Some("pw"));
    }

    #[test]
    fn test_resolve_malformed_auth_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(&path, "[]").unwrap();

        assert!(RegistryAuth::resolve("ghcr.io", Some(&path)).is_err());
    }

    #[test]
    fn test_digest_from_manifest_url() {
        let digest = format!("sha256:{}", "c".repeat(64));
        assert_eq!(
            digest_from_manifest_url(&format!(
                "https://ghcr.io/v2/acme/web/manifests/{}",
                digest
            )),
            Some(digest.clone())
        );
        assert_eq!(
            digest_from_manifest_url(&format!(
                "http://localhost:5000/v2/web/manifests/{}/",
                digest
            )),
            Some(digest)
        );
        assert_eq!(
            digest_from_manifest_url("https://ghcr.io/v2/acme/web/manifests/latest"),
            None
        );
        assert_eq!(digest_from_manifest_url(""), None);
    }

    #[test]
    fn test_health_url() {
        let client = RegistryClient::new(RegistryAuth::anonymous(), false).unwrap();
        assert_eq!(client.health_url("ghcr.io"), "https://ghcr.io/v2/");
        assert_eq!(
            client.health_url("docker.io"),
            "https://registry-1.docker.io/v2/"
        );

        let local = RegistryClient::new(RegistryAuth::anonymous(), true).unwrap();
        assert_eq!(local.health_url("localhost:5000"), "http://localhost:5000/v2/");
    }

    #[test]
    fn test_parse_reference() {
        let digest = format!("sha256:{}", "a".repeat(64));
        let oci_ref =
            RegistryClient::parse_reference(&format!("ghcr.io/acme/web@{}", digest)).unwrap();
        assert_eq!(oci_ref.registry(), "ghcr.io");
        assert_eq!(oci_ref.repository(), "acme/web");
        assert_eq!(oci_ref.digest(), Some(digest.as_str()));

        assert!(RegistryClient::parse_reference("").is_err());
    }

    #[test]
    fn test_oci_index_conversion() {
        let mut list = ManifestList::new();
        list.push(
            Descriptor {
                media_type: OCI_IMAGE_MANIFEST_MEDIA_TYPE.to_string(),
                digest: format!("sha256:{}", "a".repeat(64)),
                size: 700,
            },
            &super::super::platform::Platform::parse("arm/v7"),
        );
        list.annotations
            .insert("org.opencontainers.image.version".to_string(), "1".to_string());

        let oci_index: OciImageIndex =
            serde_json::from_value(serde_json::to_value(&list).unwrap()).unwrap();
        assert_eq!(oci_index.manifests.len(), 1);

        let back: ManifestList =
            serde_json::from_value(serde_json::to_value(&oci_index).unwrap()).unwrap();
        assert_eq!(back.platform_digests(), list.platform_digests());
    }
}
