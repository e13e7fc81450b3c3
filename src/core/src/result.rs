//! Build results.

use std::fmt;
use std::time::Duration;

/// Artifact produced by one build unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Container image, identified by image reference
    Container,
    /// Cloud machine image, identified by image ID
    MachineImage,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container => write!(f, "container"),
            Self::MachineImage => write!(f, "ami"),
        }
    }
}

/// Output of one build unit.
///
/// Results are values: later phases derive new results (`with_digest`,
/// `with_note`) instead of mutating ones already collected.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildResult {
    pub kind: ArtifactKind,

    /// Image reference or machine image ID
    pub id: String,

    /// Content digest, known once pushed
    pub digest: Option<String>,

    pub architecture: Option<String>,
    pub platform: Option<String>,
    pub region: Option<String>,
    pub duration: Duration,
    pub notes: Vec<String>,
}

impl BuildResult {
    pub fn container(image_ref: impl Into<String>) -> Self {
        Self::new(ArtifactKind::Container, image_ref.into())
    }

    pub fn machine_image(image_id: impl Into<String>, region: Option<&str>) -> Self {
        let mut result = Self::new(ArtifactKind::MachineImage, image_id.into());
        result.region = region.map(str::to_string);
        result
    }

    fn new(kind: ArtifactKind, id: String) -> Self {
        Self {
            kind,
            id,
            digest: None,
            architecture: None,
            platform: None,
            region: None,
            duration: Duration::ZERO,
            notes: Vec::new(),
        }
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    pub fn with_architecture(mut self, architecture: impl Into<String>) -> Self {
        self.architecture = Some(architecture.into());
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}
