//! Platform strings (`os/architecture[/variant]`).

use std::fmt;

/// OS assumed when an architecture token does not name one.
pub const DEFAULT_OS: &str = "linux";

const KNOWN_OS: &[&str] = &[
    "linux", "windows", "darwin", "freebsd", "netbsd", "openbsd", "illumos", "solaris",
];

/// Resolved image platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    pub variant: Option<String>,
}

impl Platform {
    /// Parse an architecture token or full platform string.
    ///
    /// - `amd64` → linux/amd64
    /// - `arm/v7` → linux/arm, variant v7
    /// - `linux/arm64` → linux/arm64
    /// - `windows/amd64` → windows/amd64
    /// - `linux/arm/v6` → linux/arm, variant v6
    pub fn parse(token: &str) -> Self {
        let parts: Vec<&str> = token.trim().split('/').filter(|p| !p.is_empty()).collect();
        match parts.as_slice() {
            [] => Self::new(DEFAULT_OS, "", None),
            [arch] => Self::new(DEFAULT_OS, arch, None),
            [first, second] if is_known_os(first) => Self::new(first, second, None),
            [arch, variant] => Self::new(DEFAULT_OS, arch, Some(variant)),
            [os, arch, variant, ..] => Self::new(os, arch, Some(variant)),
        }
    }

    fn new(os: &str, architecture: &str, variant: Option<&str>) -> Self {
        Self {
            os: os.to_string(),
            architecture: architecture.to_string(),
            variant: variant.map(str::to_string),
        }
    }

    /// Architecture with variant, without OS (`arm/v7`).
    pub fn arch_token(&self) -> String {
        match &self.variant {
            Some(variant) => format!("{}/{}", self.architecture, variant),
            None => self.architecture.clone(),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch_token())
    }
}

fn is_known_os(token: &str) -> bool {
    KNOWN_OS.contains(&token)
}

/// Encode an architecture for use in a file name (`arm/v7` → `arm-v7`).
pub fn encode_architecture(architecture: &str) -> String {
    architecture.replace('/', "-")
}

/// Decode a file-name architecture (`arm-v7` → `arm/v7`).
///
/// Only a trailing variant segment (`v` followed by digits) is decoded.
pub fn decode_architecture(encoded: &str) -> String {
    match encoded.rsplit_once('-') {
        Some((arch, variant)) if !arch.is_empty() && is_variant(variant) => {
            format!("{}/{}", arch, variant)
        }
        _ => encoded.to_string(),
    }
}

/// True for variant tokens like `v7` or `v8`.
pub fn is_variant(token: &str) -> bool {
    token.len() > 1
        && token.starts_with('v')
        && token[1..].chars().all(|c| c.is_ascii_digit())
}

/// Normalize a user-supplied architecture (`linux/arm64` → `arm64`, `arm-v7` → `arm/v7`).
pub fn normalize_architecture(architecture: &str) -> String {
    Platform::parse(&decode_architecture(architecture.trim())).arch_token()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_arch() {
        let p = Platform::parse("amd64");
        assert_eq!(p.os, "linux");
        assert_eq!(p.architecture, "amd64");
        assert_eq!(p.variant, None);
        assert_eq!(p.to_string(), "linux/amd64");
    }

    #[test]
    fn test_parse_arch_with_variant() {
        let p = Platform::parse("arm/v7");
        assert_eq!(p.os, "linux");
        assert_eq!(p.architecture, "arm");
        assert_eq!(p.variant.as_deref(), Some("v7"));
        assert_eq!(p.to_string(), "linux/arm/v7");
        assert_eq!(p.arch_token(), "arm/v7");
    }

    #[test]
    fn test_parse_os_and_arch() {
        let p = Platform::parse("linux/arm64");
        assert_eq!(p.os, "linux");
        assert_eq!(p.architecture, "arm64");
        assert_eq!(p.variant, None);

        let p = Platform::parse("windows/amd64");
        assert_eq!(p.os, "windows");
        assert_eq!(p.architecture, "amd64");
    }

    #[test]
    fn test_parse_full_platform() {
        let p = Platform::parse("linux/arm/v6");
        assert_eq!(p.os, "linux");
        assert_eq!(p.architecture, "arm");
        assert_eq!(p.variant.as_deref(), Some("v6"));
    }

    #[test]
    fn test_parse_is_deterministic() {
        assert_eq!(Platform::parse("arm64/v8"), Platform::parse("arm64/v8"));
    }

    #[test]
    fn test_encode_decode() {
        assert_eq!(encode_architecture("arm/v7"), "arm-v7");
        assert_eq!(encode_architecture("amd64"), "amd64");
        assert_eq!(decode_architecture("arm-v7"), "arm/v7");
        assert_eq!(decode_architecture("arm64-v8"), "arm64/v8");
        assert_eq!(decode_architecture("ppc64le"), "ppc64le");
        assert_eq!(decode_architecture("x86-64"), "x86-64");
        assert_eq!(decode_architecture("-v7"), "-v7");
    }

    #[test]
    fn test_is_variant() {
        assert!(is_variant("v7"));
        assert!(is_variant("v8"));
        assert!(!is_variant("v"));
        assert!(!is_variant("vx"));
        assert!(!is_variant("64"));
    }

    #[test]
    fn test_normalize_architecture() {
        assert_eq!(normalize_architecture("linux/arm64"), "arm64");
        assert_eq!(normalize_architecture("arm-v7"), "arm/v7");
        assert_eq!(normalize_architecture("arm/v7"), "arm/v7");
        assert_eq!(normalize_architecture(" amd64 "), "amd64");
        assert_eq!(normalize_architecture("linux/arm/v6"), "arm/v6");
    }
}
