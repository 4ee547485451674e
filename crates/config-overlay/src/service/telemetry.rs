//! Service-level telemetry abstractions.
//!
//! Embedders can implement [`ConfigSourceTelemetry`] to observe rebuild
//! outcomes and syncer restarts without depending on the internal service
//! state. A no-op implementation is provided for callers that do not require
//! instrumentation.

use crate::databroker::SyncError;

/// Per-fragment merge result, emitted for every fragment on every rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentInfo {
    /// Service scope of the configuration being built.
    pub services: String,
    pub fragment_id: String,
    pub version: u64,
    /// Routes of the fragment that were dropped.
    pub error_count: u64,
}

/// Emitted when a fragment's settings fail validation and abort the rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentRejection {
    pub services: String,
    pub fragment_id: String,
    pub version: u64,
    /// Rendered validation error.
    pub error: String,
}

/// Emitted at the end of every rebuild attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigInfo {
    pub services: String,
    /// Name of the source that produced the configuration.
    pub source: String,
    /// Checksum of the published configuration (empty when nothing was published).
    pub checksum: String,
    pub success: bool,
}

/// Telemetry hook invoked on significant overlay events.
pub trait ConfigSourceTelemetry: Send + Sync {
    /// Called for every fragment merged into a rebuild.
    fn on_fragment_info(&self, _info: &FragmentInfo) {}
    /// Called when a fragment's settings are rejected.
    fn on_fragment_rejected(&self, _rejection: &FragmentRejection) {}
    /// Called after every rebuild attempt, successful or not.
    fn on_config_info(&self, _info: &ConfigInfo) {}
    /// Called when a new syncer generation starts.
    fn on_syncer_started(&self, _generation: u64) {}
    /// Called when a broker channel cannot be created.
    fn on_connect_error(&self, _error: &SyncError) {}
}

/// Default telemetry implementation that performs no-ops.
#[derive(Debug, Default)]
pub(crate) struct NoopTelemetry;

impl ConfigSourceTelemetry for NoopTelemetry {}
