//! Process-driven build backends used by the `strata` binary.

pub mod aws;
pub mod buildx;
pub mod process;

pub use aws::{AwsCliFactory, AwsCliImageBuilder};
pub use buildx::{BuildxBuilder, BuildxFactory};
pub use process::{CommandOutput, ProcessRunner};
