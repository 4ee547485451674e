//! Telemetry helpers for the configuration overlay.
//!
//! This module provides drop-in implementations of [`ConfigSourceTelemetry`]
//! that make it easy to surface metrics or integrate with external monitoring
//! systems. Consumers can either use the provided counting primitives to
//! expose their own metrics or wrap them in application-specific emitters.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::databroker::SyncError;
use crate::service::{ConfigInfo, ConfigSourceTelemetry, FragmentInfo, FragmentRejection};

/// Aggregated telemetry counters (all values use relaxed atomics).
#[derive(Debug, Default)]
pub struct TelemetryCounters {
    rebuild_success: AtomicU64,
    rebuild_failure: AtomicU64,
    fragment_rejected: AtomicU64,
    route_errors: AtomicU64,
    syncer_started: AtomicU64,
    connect_error: AtomicU64,
    fragments: Mutex<BTreeMap<String, FragmentInfo>>,
    rejections: Mutex<BTreeMap<String, FragmentRejection>>,
    last_config: Mutex<Option<ConfigInfo>>,
}

impl TelemetryCounters {
    /// Captures a point-in-time snapshot of the counters.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            rebuild_success: self.rebuild_success.load(Ordering::Relaxed),
            rebuild_failure: self.rebuild_failure.load(Ordering::Relaxed),
            fragment_rejected: self.fragment_rejected.load(Ordering::Relaxed),
            route_errors: self.route_errors.load(Ordering::Relaxed),
            syncer_started: self.syncer_started.load(Ordering::Relaxed),
            connect_error: self.connect_error.load(Ordering::Relaxed),
        }
    }

    /// Latest status reported for a fragment.
    pub fn fragment_info(&self, fragment_id: &str) -> Option<FragmentInfo> {
        self.fragments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(fragment_id)
            .cloned()
    }

    /// Latest rejection reported for a fragment.
    pub fn fragment_rejection(&self, fragment_id: &str) -> Option<FragmentRejection> {
        self.rejections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(fragment_id)
            .cloned()
    }

    /// Most recent config-info record.
    pub fn last_config_info(&self) -> Option<ConfigInfo> {
        self.last_config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Plain data representation of [`TelemetryCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TelemetrySnapshot {
    /// Rebuilds that published a configuration.
    pub rebuild_success: u64,
    /// Rebuilds aborted without publishing.
    pub rebuild_failure: u64,
    /// Fragments whose settings were rejected.
    pub fragment_rejected: u64,
    /// Routes dropped across all fragment reports.
    pub route_errors: u64,
    /// Syncer generations started.
    pub syncer_started: u64,
    /// Broker channels that could not be created.
    pub connect_error: u64,
}

impl fmt::Display for TelemetrySnapshot {
    /// Formats the snapshot metrics into a comma-separated list for logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rebuild_success={}, rebuild_failure={}, fragment_rejected={}, route_errors={}, syncer_started={}, connect_error={}",
            self.rebuild_success,
            self.rebuild_failure,
            self.fragment_rejected,
            self.route_errors,
            self.syncer_started,
            self.connect_error
        )
    }
}

/// Telemetry implementation that maintains counters for every signal.
///
/// The latest per-fragment records are kept as well so callers can expose
/// them as gauges keyed by fragment id.
#[derive(Debug, Clone)]
pub struct CountingTelemetry {
    counters: Arc<TelemetryCounters>,
}

impl CountingTelemetry {
    /// Creates a new telemetry instance backed by the provided counter set.
    pub fn new(counters: Arc<TelemetryCounters>) -> Self {
        Self { counters }
    }

    /// Returns the underlying counter set.
    pub fn counters(&self) -> Arc<TelemetryCounters> {
        self.counters.clone()
    }
}

impl Default for CountingTelemetry {
    fn default() -> Self {
        Self::new(Arc::new(TelemetryCounters::default()))
    }
}

impl ConfigSourceTelemetry for CountingTelemetry {
    fn on_fragment_info(&self, info: &FragmentInfo) {
        self.counters
            .route_errors
            .fetch_add(info.error_count, Ordering::Relaxed);
        self.counters
            .fragments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(info.fragment_id.clone(), info.clone());
    }

    fn on_fragment_rejected(&self, rejection: &FragmentRejection) {
        self.counters
            .fragment_rejected
            .fetch_add(1, Ordering::Relaxed);
        self.counters
            .rejections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(rejection.fragment_id.clone(), rejection.clone());
    }

    /// Splits config-info records into success and failure counters.
    fn on_config_info(&self, info: &ConfigInfo) {
        if info.success {
            self.counters
                .rebuild_success
                .fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters
                .rebuild_failure
                .fetch_add(1, Ordering::Relaxed);
        }
        *self
            .counters
            .last_config
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(info.clone());
    }

    fn on_syncer_started(&self, _generation: u64) {
        self.counters.syncer_started.fetch_add(1, Ordering::Relaxed);
    }

    fn on_connect_error(&self, _error: &SyncError) {
        self.counters.connect_error.fetch_add(1, Ordering::Relaxed);
    }
}

/// Telemetry implementation that forwards events to multiple observers.
///
/// This allows applications to combine counters with logging or custom sinks.
pub struct CompositeTelemetry {
    observers: Vec<Arc<dyn ConfigSourceTelemetry>>,
}

impl fmt::Debug for CompositeTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeTelemetry")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl CompositeTelemetry {
    pub fn new(observers: Vec<Arc<dyn ConfigSourceTelemetry>>) -> Self {
        Self { observers }
    }
}

impl ConfigSourceTelemetry for CompositeTelemetry {
    fn on_fragment_info(&self, info: &FragmentInfo) {
        for observer in &self.observers {
            observer.on_fragment_info(info);
        }
    }

    fn on_fragment_rejected(&self, rejection: &FragmentRejection) {
        for observer in &self.observers {
            observer.on_fragment_rejected(rejection);
        }
    }

    fn on_config_info(&self, info: &ConfigInfo) {
        for observer in &self.observers {
            observer.on_config_info(info);
        }
    }

    fn on_syncer_started(&self, generation: u64) {
        for observer in &self.observers {
            observer.on_syncer_started(generation);
        }
    }

    fn on_connect_error(&self, error: &SyncError) {
        for observer in &self.observers {
            observer.on_connect_error(error);
        }
    }
}
