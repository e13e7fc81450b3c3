use thiserror::Error;

/// Strata error types
#[derive(Error, Debug)]
pub enum StrataError {
    /// Target type not handled by any backend
    #[error("unsupported target type: '{0}'")]
    UnsupportedTarget(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Digest discovery found nothing to assemble
    #[error("no digest files found in {directory} (expected files matching pattern: {pattern})")]
    NoDigestFiles { directory: String, pattern: String },

    /// Digest file with unreadable name or payload
    #[error("invalid digest file {path}: {message}")]
    InvalidDigest { path: String, message: String },

    /// Digest file rejected by name or age validation
    #[error("digest validation failed: {0}")]
    DigestValidation(String),

    /// Strict filtering found required architectures missing
    #[error(
        "missing required architectures: {} (use --best-effort to create a partial manifest)",
        .0.join(", ")
    )]
    MissingArchitectures(Vec<String>),

    /// Filtering left nothing to assemble
    #[error("no valid architectures found after filtering")]
    NoArchitectures,

    /// Build execution failed
    #[error("Build error: {0}")]
    BuildError(String),

    /// External build backend failed
    #[error("Backend error: {backend} - {message}")]
    BackendError { backend: String, message: String },

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// Operation observed cancellation
    #[error("operation cancelled")]
    Cancelled,

    /// Every region of a fan-out failed
    #[error("all regional builds failed ({failed}/{total}): {}", .details.join("; "))]
    RegionBuildsFailed {
        failed: usize,
        total: usize,
        details: Vec<String>,
    },

    /// One or more cross-region copies failed
    #[error("some region copies failed ({failed}/{total}): {}", .details.join("; "))]
    RegionCopiesFailed {
        failed: usize,
        total: usize,
        details: Vec<String>,
    },

    /// A digest could not be confirmed in the registry
    #[error("verification failed for {architecture} ({digest}): {message}")]
    VerificationFailed {
        architecture: String,
        digest: String,
        message: String,
    },

    /// Manifest push failed for one or more tags
    #[error("failed to push {failed} of {total} tag(s): {}", .tags.join(", "))]
    ManifestPushFailed {
        failed: usize,
        total: usize,
        tags: Vec<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl StrataError {
    /// True when the error only reports that work was abandoned.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StrataError::Cancelled)
    }
}

impl From<serde_json::Error> for StrataError {
    fn from(err: serde_json::Error) -> Self {
        StrataError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for StrataError {
    fn from(err: serde_yaml::Error) -> Self {
        StrataError::SerializationError(err.to_string())
    }
}

/// Result type alias for Strata operations
pub type Result<T> = std::result::Result<T, StrataError>;
