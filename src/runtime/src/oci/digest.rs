//! Per-architecture digest files.
//!
//! A push records its manifest digest in `digest-{IMAGE}-{ARCH}.txt`, where
//! `ARCH` encodes a variant with a dash (`arm-v7`). The file holds a single
//! line `sha256:<64 lowercase hex>`. A later `manifests create` run discovers
//! these files and assembles them into one multi-architecture index.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use strata_core::error::{Result, StrataError};

use super::platform::{decode_architecture, encode_architecture};

/// Architectures recognised in digest file names, in encoded form.
pub const KNOWN_ARCHITECTURES: &[&str] = &[
    "amd64", "arm64", "arm-v7", "arm-v6", "arm-v8", "ppc64le", "s390x", "386", "riscv64",
];

const PREFIX: &str = "digest-";
const SUFFIX: &str = ".txt";

/// One discovered digest file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestFile {
    pub path: PathBuf,
    pub image_name: String,
    /// Architecture, with variant as `arch/variant`
    pub architecture: String,
    pub digest: String,
    pub modified: SystemTime,
}

/// Secondary validation applied after discovery.
#[derive(Debug, Clone, Default)]
pub struct ValidationOptions {
    pub image_name: String,
    /// Maximum file age; zero disables the check
    pub max_age: Duration,
}

/// File name for an image/architecture pair (`arm/v7` → `digest-img-arm-v7.txt`).
pub fn digest_file_name(image_name: &str, architecture: &str) -> String {
    format!(
        "{}{}-{}{}",
        PREFIX,
        image_name,
        encode_architecture(architecture),
        SUFFIX
    )
}

/// Glob-style pattern shown in discovery errors.
pub fn digest_file_pattern(image_name: &str) -> String {
    format!("{}{}-*{}", PREFIX, image_name, SUFFIX)
}

/// Validate a digest payload, returning it trimmed.
pub fn parse_digest(content: &str) -> std::result::Result<String, String> {
    let digest = content.trim();
    let Some(encoded) = digest.strip_prefix("sha256:") else {
        return Err(format!(
            "unsupported digest '{}' (expected sha256:<64 hex chars>)",
            digest
        ));
    };
    if encoded.len() != 64 {
        return Err(format!(
            "digest has {} hex chars, expected 64",
            encoded.len()
        ));
    }
    if encoded.bytes().any(|b| b.is_ascii_uppercase()) || hex::decode(encoded).is_err() {
        return Err(format!("digest '{}' is not lowercase hex", digest));
    }
    Ok(digest.to_string())
}

/// Split a digest file name into image name and architecture.
///
/// Returns `None` for names outside the convention or with an unknown
/// architecture suffix.
pub fn split_file_name(file_name: &str) -> Option<(String, String)> {
    let name_arch = file_name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;
    KNOWN_ARCHITECTURES.iter().find_map(|arch| {
        let image = name_arch.strip_suffix(arch)?.strip_suffix('-')?;
        if image.is_empty() {
            None
        } else {
            Some((image.to_string(), decode_architecture(arch)))
        }
    })
}

/// Parse a single digest file.
pub fn parse_digest_file(path: &Path) -> Result<DigestFile> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let (image_name, architecture) =
        split_file_name(file_name).ok_or_else(|| StrataError::InvalidDigest {
            path: path.display().to_string(),
            message: format!(
                "file name does not match digest-<image>-<arch>.txt with a known architecture ({})",
                KNOWN_ARCHITECTURES.join(", ")
            ),
        })?;

    let content = std::fs::read_to_string(path).map_err(|e| StrataError::InvalidDigest {
        path: path.display().to_string(),
        message: format!("failed to read: {}", e),
    })?;
    let digest = parse_digest(&content).map_err(|message| StrataError::InvalidDigest {
        path: path.display().to_string(),
        message,
    })?;
    let modified = std::fs::metadata(path)?.modified()?;

    Ok(DigestFile {
        path: path.to_path_buf(),
        image_name,
        architecture,
        digest,
        modified,
    })
}

/// Discover digest files for `image_name` in `directory`.
///
/// Files are returned sorted by name. Zero matches is an error. Names that
/// match the image prefix but carry an unknown architecture are skipped with
/// a warning; a malformed payload fails discovery.
pub fn discover_digest_files(image_name: &str, directory: &Path) -> Result<Vec<DigestFile>> {
    tracing::info!(
        image = %image_name,
        directory = %directory.display(),
        "Discovering digest files"
    );

    let entries = std::fs::read_dir(directory).map_err(|e| {
        StrataError::ConfigError(format!(
            "Failed to read digest directory {}: {}",
            directory.display(),
            e
        ))
    })?;

    let prefix = format!("{}{}-", PREFIX, image_name);
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(&prefix) || !name.ends_with(SUFFIX) || !entry.file_type()?.is_file() {
            continue;
        }
        if split_file_name(name).is_none() {
            tracing::warn!(
                file = %name,
                "Skipping digest file with unknown architecture"
            );
            continue;
        }
        paths.push(entry.path());
    }
    paths.sort();

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let file = parse_digest_file(&path)?;
        tracing::debug!(
            path = %file.path.display(),
            architecture = %file.architecture,
            digest = %file.digest,
            "Found digest file"
        );
        files.push(file);
    }

    if files.is_empty() {
        return Err(StrataError::NoDigestFiles {
            directory: directory.display().to_string(),
            pattern: digest_file_pattern(image_name),
        });
    }

    Ok(files)
}

/// Reject files for another image or older than `max_age`.
pub fn validate_digest_files(files: &[DigestFile], opts: &ValidationOptions) -> Result<()> {
    validate_digest_files_at(files, opts, SystemTime::now())
}

fn validate_digest_files_at(
    files: &[DigestFile],
    opts: &ValidationOptions,
    now: SystemTime,
) -> Result<()> {
    for file in files {
        if file.image_name != opts.image_name {
            return Err(StrataError::DigestValidation(format!(
                "{} has incorrect image name: expected {}, got {}",
                file.path.display(),
                opts.image_name,
                file.image_name
            )));
        }

        let age = now.duration_since(file.modified).unwrap_or(Duration::ZERO);
        if !opts.max_age.is_zero() && age > opts.max_age {
            return Err(StrataError::DigestValidation(format!(
                "{} is too old: {}s (max age: {}s)",
                file.path.display(),
                age.as_secs(),
                opts.max_age.as_secs()
            )));
        }

        tracing::debug!(
            path = %file.path.display(),
            architecture = %file.architecture,
            age_secs = age.as_secs(),
            "Validated digest file"
        );
    }
    Ok(())
}

/// Write a digest file for `image_name`/`architecture` into `directory`.
pub fn save_digest(
    image_name: &str,
    architecture: &str,
    digest: &str,
    directory: &Path,
) -> Result<PathBuf> {
    let digest = parse_digest(digest).map_err(|message| StrataError::InvalidDigest {
        path: digest_file_name(image_name, architecture),
        message,
    })?;

    std::fs::create_dir_all(directory)?;
    let path = directory.join(digest_file_name(image_name, architecture));
    std::fs::write(&path, format!("{}\n", digest))?;

    tracing::info!(
        path = %path.display(),
        architecture = %architecture,
        digest = %digest,
        "Saved digest"
    );
    Ok(path)
}
