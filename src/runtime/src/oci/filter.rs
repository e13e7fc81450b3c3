//! Architecture selection for manifest assembly.

use strata_core::error::{Result, StrataError};

use super::digest::DigestFile;
use super::platform::normalize_architecture;

/// Which architectures must be present.
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    /// Required architectures; empty passes every discovered architecture
    pub required: Vec<String>,
    /// Proceed with the available subset when some are missing
    pub best_effort: bool,
}

/// Reduce discovered digests to the architectures used for assembly.
///
/// Discovery order is preserved. With required architectures, extras are
/// dropped; missing ones fail in strict mode and are skipped in best-effort
/// mode. An empty selection always fails.
pub fn filter_architectures(files: &[DigestFile], opts: &FilterOptions) -> Result<Vec<DigestFile>> {
    if opts.required.is_empty() {
        if files.is_empty() {
            return Err(StrataError::NoArchitectures);
        }
        let detected: Vec<&str> = files.iter().map(|f| f.architecture.as_str()).collect();
        tracing::info!(
            count = detected.len(),
            architectures = ?detected,
            "Using all discovered architectures"
        );
        return Ok(files.to_vec());
    }

    let mut required: Vec<String> = Vec::with_capacity(opts.required.len());
    for arch in &opts.required {
        let arch = normalize_architecture(arch);
        if !arch.is_empty() && !required.contains(&arch) {
            required.push(arch);
        }
    }

    let mut selected: Vec<DigestFile> = Vec::with_capacity(required.len());
    for file in files {
        let arch = normalize_architecture(&file.architecture);
        let already = selected
            .iter()
            .any(|s| normalize_architecture(&s.architecture) == arch);
        if required.contains(&arch) && !already {
            selected.push(file.clone());
        }
    }

    let missing: Vec<String> = required
        .iter()
        .filter(|arch| {
            !selected
                .iter()
                .any(|s| &normalize_architecture(&s.architecture) == *arch)
        })
        .cloned()
        .collect();

    if !missing.is_empty() {
        if !opts.best_effort {
            return Err(StrataError::MissingArchitectures(missing));
        }
        tracing::warn!(
            missing = ?missing,
            available = selected.len(),
            "Required architectures missing, continuing in best-effort mode"
        );
    }

    if selected.is_empty() {
        return Err(StrataError::NoArchitectures);
    }
    Ok(selected)
}
