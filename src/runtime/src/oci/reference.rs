//! Manifest and digest reference formatting.
//!
//! A repository is addressed as `{registry}/{namespace}/{image}`; the namespace
//! segment is omitted when empty. Tag references append `:{tag}`, digest
//! references append `@{digest}`.

use std::fmt;

use strata_core::error::{Result, StrataError};

/// Registry repository that manifests are pushed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRef {
    /// Registry host, optionally with a path prefix (e.g., "ghcr.io", "localhost:5000")
    pub registry: String,
    /// Namespace between registry and image (e.g., "acme"); empty when absent
    pub namespace: String,
    /// Image name
    pub image: String,
}

impl RepositoryRef {
    pub fn new(
        registry: impl Into<String>,
        namespace: impl Into<String>,
        image: impl Into<String>,
    ) -> Result<Self> {
        let registry = registry.into().trim().trim_end_matches('/').to_string();
        let namespace = namespace.into().trim().trim_matches('/').to_string();
        let image = image.into().trim().to_string();

        if registry.is_empty() {
            return Err(StrataError::ConfigError("registry is required".to_string()));
        }
        if image.is_empty() {
            return Err(StrataError::ConfigError("image name is required".to_string()));
        }
        if image.contains(':') || image.contains('@') {
            return Err(StrataError::ConfigError(format!(
                "image name '{}' must not carry a tag or digest",
                image
            )));
        }

        Ok(Self {
            registry,
            namespace,
            image,
        })
    }

    /// Repository path without tag or digest.
    pub fn repository(&self) -> String {
        if self.namespace.is_empty() {
            format!("{}/{}", self.registry, self.image)
        } else {
            format!("{}/{}/{}", self.registry, self.namespace, self.image)
        }
    }

    /// Tag-addressed reference (`registry/namespace/image:tag`).
    pub fn tagged(&self, tag: &str) -> String {
        format!("{}:{}", self.repository(), tag)
    }

    /// Digest-addressed reference (`registry/namespace/image@digest`).
    pub fn by_digest(&self, digest: &str) -> String {
        format!("{}@{}", self.repository(), digest)
    }

    /// Registry host, without any path prefix.
    pub fn host(&self) -> &str {
        registry_host(&self.registry)
    }
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repository())
    }
}

/// Host part of a registry or reference string (`ghcr.io/acme/web:1` → `ghcr.io`).
pub fn registry_host(reference: &str) -> &str {
    reference.split('/').next().unwrap_or(reference)
}

/// Qualify a local image reference with a registry prefix.
///
/// References that already name a registry path are returned unchanged.
pub fn qualify(image_ref: &str, registry: &str) -> String {
    let registry = registry.trim_end_matches('/');
    if registry.is_empty() || image_ref.starts_with(&format!("{}/", registry)) {
        image_ref.to_string()
    } else {
        format!("{}/{}", registry, image_ref)
    }
}
