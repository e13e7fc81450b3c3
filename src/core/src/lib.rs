//! Strata Core - Foundational Types and Abstractions
//!
//! Build templates, per-invocation options, build results, builder
//! capability traits and the error type shared by the Strata crates.

pub mod builder;
pub mod config;
pub mod error;
pub mod options;
pub mod redact;
pub mod result;
pub mod template;

// Re-export commonly used types
pub use builder::{
    ClientConfig, ContainerBuilder, ContainerBuilderFactory, ImageBuilder, ImageBuilderFactory,
    MonitorConfig,
};
pub use config::StrataConfig;
pub use error::{Result, StrataError};
pub use options::BuildOptions;
pub use result::{ArtifactKind, BuildResult};
pub use template::{BuildConfig, Target, TARGET_AMI, TARGET_CONTAINER};

/// Strata version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
