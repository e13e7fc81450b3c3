//! OCI registry support for multi-architecture images.
//!
//! Per-architecture builds leave one digest file each in a local
//! directory. This module turns those files into a published image index:
//!
//! ```text
//! digest-web-amd64.txt ─┐
//! digest-web-arm64.txt ─┼─> discover ─> filter ─> verify ─> assemble ─> push
//! digest-web-arm-v7.txt ┘     (digest)   (filter)  (verify)  (manifest)
//! ```

pub mod credentials;
pub mod digest;
pub mod filter;
pub mod index;
pub mod manifest;
pub mod platform;
pub mod provider;
pub mod reference;
pub mod registry;
pub mod verify;

pub use credentials::CredentialStore;
pub use digest::{
    discover_digest_files, save_digest, validate_digest_files, DigestFile, ValidationOptions,
};
pub use filter::{filter_architectures, FilterOptions};
pub use index::{Descriptor, ManifestList};
pub use manifest::{
    AssembleOptions, AssembleOutcome, ManifestAssembler, ManifestEntry, PlannedManifest,
    PushedManifest,
};
pub use platform::Platform;
pub use provider::ManifestRegistry;
pub use reference::RepositoryRef;
pub use registry::{RegistryAuth, RegistryClient};
pub use verify::{check_registry_health, resolve_concurrency, verify_digests};
