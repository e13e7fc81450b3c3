//! Strata CLI - multi-architecture image builds and manifest publishing.

pub mod commands;
pub mod output;
