//! Table formatting helpers for CLI output.

use comfy_table::{ContentArrangement, Table};
use strata_core::BuildResult;

/// Create a styled table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Shorten a `sha256:` digest to 12 hex characters.
pub fn short_digest(digest: &str) -> String {
    let hex = digest.strip_prefix("sha256:").unwrap_or(digest);
    hex.chars().take(12).collect()
}

/// Format a duration as whole seconds, or minutes and seconds.
pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else {
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}

/// Build results as a table.
pub fn results_table(results: &[BuildResult]) -> Table {
    let mut table = new_table(&[
        "TYPE", "ID", "PLATFORM", "REGION", "DIGEST", "DURATION", "NOTES",
    ]);
    for result in results {
        table.add_row(vec![
            result.kind.to_string(),
            result.id.clone(),
            result.platform.clone().unwrap_or_else(|| "-".to_string()),
            result.region.clone().unwrap_or_else(|| "-".to_string()),
            result
                .digest
                .as_deref()
                .map(short_digest)
                .unwrap_or_else(|| "-".to_string()),
            format_duration(result.duration),
            result.notes.join("; "),
        ]);
    }
    table
}
