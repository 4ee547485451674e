//! Configuration overlay service module facade.
//!
//! This module re-exports the high-level overlay API while wiring the
//! submodules that implement the merge, the syncer lifecycle, and telemetry.

pub(crate) mod config;
mod core;
pub(crate) mod handler;
pub(crate) mod rebuild;
pub(crate) mod state;
pub(crate) mod telemetry;
#[cfg(test)]
pub(crate) mod test_support;
pub(crate) mod updater;

pub use config::{SourceConfig, DEFAULT_SOURCE_NAME};
pub use core::*;
pub use rebuild::RebuildError;
pub use telemetry::{ConfigInfo, ConfigSourceTelemetry, FragmentInfo, FragmentRejection};
