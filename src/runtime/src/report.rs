//! JSON build report written after a build (`--manifest-out`).

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_core::error::{Result, StrataError};
use strata_core::{BuildConfig, BuildResult};

/// One artifact in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub kind: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub duration_secs: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl From<&BuildResult> for ReportEntry {
    fn from(result: &BuildResult) -> Self {
        Self {
            kind: result.kind.to_string(),
            id: result.id.clone(),
            digest: result.digest.clone(),
            architecture: result.architecture.clone(),
            platform: result.platform.clone(),
            region: result.region.clone(),
            duration_secs: result.duration.as_secs_f64(),
            notes: result.notes.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    pub template: String,
    pub version: String,
    pub target: String,
    pub timestamp: DateTime<Utc>,
    pub duration_secs: f64,
    pub pushed: bool,
    pub tool_version: String,
    pub results: Vec<ReportEntry>,
}

impl BuildReport {
    pub fn new(
        config: &BuildConfig,
        target: &str,
        results: &[BuildResult],
        duration: Duration,
        pushed: bool,
    ) -> Self {
        Self {
            template: config.name.clone(),
            version: config.version.clone(),
            target: target.to_string(),
            timestamp: Utc::now(),
            duration_secs: duration.as_secs_f64(),
            pushed,
            tool_version: crate::VERSION.to_string(),
            results: results.iter().map(ReportEntry::from).collect(),
        }
    }

    /// Write the report as pretty JSON, readable by the owner only.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(path, body).map_err(|e| {
            StrataError::Other(format!("Failed to write report {}: {}", path.display(), e))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }

        tracing::info!(path = %path.display(), entries = self.results.len(), "Wrote build report");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn template() -> BuildConfig {
        BuildConfig {
            name: "web".to_string(),
            version: "1.2.0".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_entries_from_results() {
        let results = vec![
            BuildResult::container("ghcr.io/acme/web:amd64")
                .with_digest(format!("sha256:{}", "a".repeat(64)))
                .with_architecture("amd64"),
            BuildResult::machine_image("ami-123", Some("us-east-1"))
                .with_note("copied from region us-west-2"),
        ];
        let report = BuildReport::new(&template(), "ami", &results, Duration::from_secs(90), true);

        assert_eq!(report.template, "web");
        assert_eq!(report.version, "1.2.0");
        assert_eq!(report.duration_secs, 90.0);
        assert_eq!(report.results[0].kind, "container");
        assert_eq!(report.results[1].kind, "ami");
        assert_eq!(report.results[1].region.as_deref(), Some("us-east-1"));
        assert_eq!(report.results[1].notes, vec!["copied from region us-west-2"]);
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("report.json");
        let results = vec![BuildResult::container("web:amd64")];
        let report =
            BuildReport::new(&template(), "container", &results, Duration::from_secs(1), false);

        report.write(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["template"], "web");
        assert_eq!(value["pushed"], false);
        assert_eq!(value["results"][0]["id"], "web:amd64");
        assert!(value["results"][0].get("digest").is_none());
        assert!(value["timestamp"].is_string());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
