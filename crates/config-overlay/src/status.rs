//! Lightweight status helpers used to expose overlay health (last rebuild
//! outcome, published checksum, cached fragments) to embedders.

use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// Tracks the outcome of the most recent rebuild.
#[derive(Debug, Default)]
pub struct SourceStatus {
    last_success: AtomicBool,
    fragments: AtomicU64,
    generation: AtomicU64,
    checksum: RwLock<Option<String>>,
    last_error: RwLock<Option<String>>,
}

impl SourceStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a published configuration.
    pub fn record_success(&self, checksum: String, fragments: usize) {
        self.last_success.store(true, Ordering::Relaxed);
        self.fragments.store(fragments as u64, Ordering::Relaxed);
        *self
            .checksum
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(checksum);
        *self
            .last_error
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Records an aborted rebuild.
    pub fn record_failure(&self, error: String) {
        self.last_success.store(false, Ordering::Relaxed);
        *self
            .last_error
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// Records the syncer generation currently running.
    pub fn set_generation(&self, generation: u64) {
        self.generation.store(generation, Ordering::Relaxed);
    }

    /// Returns a status snapshot suitable for logging/exporting.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            last_success: self.last_success.load(Ordering::Relaxed),
            fragments: self.fragments.load(Ordering::Relaxed),
            generation: self.generation.load(Ordering::Relaxed),
            checksum: self
                .checksum
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            last_error: self
                .last_error
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

/// Serializable representation of [`SourceStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusSnapshot {
    /// Whether the last rebuild published a configuration.
    pub last_success: bool,
    /// Fragments merged into the published configuration.
    pub fragments: u64,
    /// Syncer generation (0 until a syncer starts).
    pub generation: u64,
    /// Checksum of the published configuration.
    pub checksum: Option<String>,
    /// Error of the last aborted rebuild, cleared on success.
    pub last_error: Option<String>,
}

impl StatusSnapshot {
    /// Renders the snapshot as a JSON map.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("lastSuccess".into(), Value::Bool(self.last_success));
        map.insert("fragments".into(), Value::from(self.fragments));
        map.insert("generation".into(), Value::from(self.generation));
        map.insert(
            "checksum".into(),
            self.checksum.clone().map_or(Value::Null, Value::String),
        );
        map.insert(
            "lastError".into(),
            self.last_error.clone().map_or(Value::Null, Value::String),
        );
        map
    }

    /// Wraps [`StatusSnapshot::to_map`] into a [`serde_json::Value`].
    pub fn to_json(&self) -> Value {
        Value::Object(self.to_map())
    }
}

/// Formats the current status as a JSON object.
pub fn status_json(status: &SourceStatus) -> Value {
    status.snapshot().to_json()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// A success clears the previous error but keeps the counters current.
    #[test]
    fn status_tracks_success_and_failure() {
        let status = SourceStatus::new();
        status.record_failure("fragment a rejected".into());
        assert!(!status.snapshot().last_success);
        assert_eq!(
            status.snapshot().last_error.as_deref(),
            Some("fragment a rejected")
        );

        status.record_success("abc".into(), 2);
        status.set_generation(4);
        let snapshot = status.snapshot();
        assert!(snapshot.last_success);
        assert_eq!(snapshot.fragments, 2);
        assert_eq!(snapshot.generation, 4);
        assert!(snapshot.last_error.is_none());
    }

    #[test]
    fn status_json_renders_all_fields() {
        let status = SourceStatus::new();
        status.record_success("abc".into(), 1);
        assert_eq!(
            status_json(&status),
            json!({
                "lastSuccess": true,
                "fragments": 1,
                "generation": 0,
                "checksum": "abc",
                "lastError": null,
            })
        );
    }
}
