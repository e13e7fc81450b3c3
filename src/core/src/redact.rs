//! Redaction of sensitive key/value settings before they reach logs.

const SENSITIVE_MARKERS: &[&str] = &["password", "secret", "token", "key", "credential"];

/// Placeholder logged instead of a sensitive value.
pub const REDACTED: &str = "[REDACTED]";

/// True when a setting name suggests its value is a secret.
pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_MARKERS.iter().any(|marker| key.contains(marker))
}

/// Value safe to log for `key`.
pub fn redact_value<'a>(key: &str, value: &'a str) -> &'a str {
    if is_sensitive_key(key) {
        REDACTED
    } else {
        value
    }
}
