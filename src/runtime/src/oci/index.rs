//! OCI image index (multi-architecture manifest list) documents.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};
use strata_core::error::Result;

use super::platform::Platform;

/// Media type of an OCI image index.
pub const OCI_IMAGE_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";

/// Media type of an OCI image manifest.
pub const OCI_IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Media type of a Docker v2 image manifest.
pub const DOCKER_MANIFEST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.v2+json";

/// Media type of a Docker v2 manifest list.
pub const DOCKER_MANIFEST_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// Content descriptor of a per-architecture manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: i64,
}

/// Image index document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestList {
    pub schema_version: u8,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    #[serde(default)]
    pub manifests: Vec<IndexEntry>,

    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub annotations: BTreeMap<String, String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<BTreeMap<String, String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// One platform-specific manifest referenced by an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub media_type: String,
    pub digest: String,
    pub size: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<IndexPlatform>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPlatform {
    pub architecture: String,
    pub os: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl From<&Platform> for IndexPlatform {
    fn from(platform: &Platform) -> Self {
        Self {
            architecture: platform.architecture.clone(),
            os: platform.os.clone(),
            variant: platform.variant.clone(),
        }
    }
}

impl IndexPlatform {
    pub fn to_platform(&self) -> Platform {
        Platform {
            os: self.os.clone(),
            architecture: self.architecture.clone(),
            variant: self.variant.clone().filter(|v| !v.is_empty()),
        }
    }
}

impl ManifestList {
    /// Empty OCI index.
    pub fn new() -> Self {
        Self {
            schema_version: 2,
            media_type: Some(OCI_IMAGE_INDEX_MEDIA_TYPE.to_string()),
            manifests: Vec::new(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, descriptor: Descriptor, platform: &Platform) {
        self.manifests.push(IndexEntry {
            media_type: descriptor.media_type,
            digest: descriptor.digest,
            size: descriptor.size,
            platform: Some(IndexPlatform::from(platform)),
        });
    }

    /// `(platform, digest)` pairs referenced by the index.
    ///
    /// Entries without a platform (attestations, for example) are ignored.
    pub fn platform_digests(&self) -> BTreeSet<(String, String)> {
        self.manifests
            .iter()
            .filter_map(|entry| {
                let platform = entry.platform.as_ref()?.to_platform();
                if platform.os == "unknown" || platform.architecture == "unknown" {
                    return None;
                }
                Some((platform.to_string(), entry.digest.clone()))
            })
            .collect()
    }

    /// Canonical JSON body.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// sha256 digest of the canonical JSON body.
    pub fn digest(&self) -> Result<String> {
        let body = self.to_json()?;
        Ok(format!("sha256:{}", hex::encode(Sha256::digest(&body))))
    }
}

impl Default for ManifestList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(c: char) -> Descriptor {
        Descriptor {
            media_type: OCI_IMAGE_MANIFEST_MEDIA_TYPE.to_string(),
            digest: format!("sha256:{}", c.to_string().repeat(64)),
            size: 1024,
        }
    }

    #[test]
    fn test_serialized_shape() {
        let mut list = ManifestList::new();
        list.push(descriptor('a'), &Platform::parse("arm/v7"));
        list.annotations
            .insert("org.opencontainers.image.version".to_string(), "1.0".to_string());

        let value: serde_json::Value = serde_json::from_slice(&list.to_json().unwrap()).unwrap();
        assert_eq!(value["schemaVersion"], 2);
        assert_eq!(value["mediaType"], OCI_IMAGE_INDEX_MEDIA_TYPE);
        assert_eq!(value["manifests"][0]["mediaType"], OCI_IMAGE_MANIFEST_MEDIA_TYPE);
        assert_eq!(value["manifests"][0]["size"], 1024);
        assert_eq!(value["manifests"][0]["platform"]["architecture"], "arm");
        assert_eq!(value["manifests"][0]["platform"]["os"], "linux");
        assert_eq!(value["manifests"][0]["platform"]["variant"], "v7");
        assert_eq!(
            value["annotations"]["org.opencontainers.image.version"],
            "1.0"
        );
    }

    #[test]
    fn test_variant_and_annotations_omitted_when_empty() {
        let mut list = ManifestList::new();
        list.push(descriptor('a'), &Platform::parse("amd64"));

        let value: serde_json::Value = serde_json::from_slice(&list.to_json().unwrap()).unwrap();
        assert!(value["manifests"][0]["platform"].get("variant").is_none());
        assert!(value.get("annotations").is_none());
    }

    #[test]
    fn test_parse_docker_manifest_list() {
        let json = r#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.docker.distribution.manifest.list.v2+json",
            "manifests": [
                {"mediaType": "application/vnd.docker.distribution.manifest.v2+json",
                 "digest": "sha256:1111111111111111111111111111111111111111111111111111111111111111",
                 "size": 528,
                 "platform": {"architecture": "amd64", "os": "linux"}},
                {"mediaType": "application/vnd.oci.image.manifest.v1+json",
                 "digest": "sha256:2222222222222222222222222222222222222222222222222222222222222222",
                 "size": 566,
                 "platform": {"architecture": "unknown", "os": "unknown"}}
            ]
        }"#;
        let list: ManifestList = serde_json::from_str(json).unwrap();
        assert_eq!(list.manifests.len(), 2);

        let pairs = list.platform_digests();
        assert_eq!(pairs.len(), 1);
        assert!(pairs.contains(&(
            "linux/amd64".to_string(),
            format!("sha256:{}", "1".repeat(64))
        )));
    }

    #[test]
    fn test_null_annotations() {
        let json = r#"{"schemaVersion":2,"manifests":[],"annotations":null}"#;
        let list: ManifestList = serde_json::from_str(json).unwrap();
        assert!(list.annotations.is_empty());
        assert!(list.media_type.is_none());
    }

    #[test]
    fn test_digest_is_stable() {
        let mut a = ManifestList::new();
        a.push(descriptor('a'), &Platform::parse("amd64"));
        let b = a.clone();
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());
        assert!(a.digest().unwrap().starts_with("sha256:"));
        assert_eq!(a.digest().unwrap().len(), 7 + 64);

        let mut c = a.clone();
        c.push(descriptor('b'), &Platform::parse("arm64"));
        assert_ne!(a.digest().unwrap(), c.digest().unwrap());
    }
}
