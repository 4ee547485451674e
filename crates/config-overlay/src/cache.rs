//! Local cache of config fragments received from the data broker.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::databroker::Record;
use crate::fragment::ConfigFragment;

/// A decoded fragment and the record version it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedFragment {
    pub fragment: ConfigFragment,
    pub version: u64,
}

/// Outcome of applying a batch of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Records stored or replaced.
    pub upserted: usize,
    /// Tombstones processed.
    pub deleted: usize,
    /// Records dropped because their payload did not decode.
    pub invalid: usize,
}

/// Fragments keyed by record identifier.
///
/// Iteration follows ascending identifier order, which is the order the
/// rebuild merges fragments in.
#[derive(Debug, Clone, Default)]
pub struct FragmentCache {
    entries: BTreeMap<String, CachedFragment>,
}

impl FragmentCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every fragment.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Stores a fragment, replacing any previous entry for the identifier.
    pub fn upsert(&mut self, id: impl Into<String>, fragment: ConfigFragment, version: u64) {
        self.entries
            .insert(id.into(), CachedFragment { fragment, version });
    }

    /// Removes a fragment if present.
    pub fn remove(&mut self, id: &str) -> Option<CachedFragment> {
        self.entries.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&CachedFragment> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over fragments in ascending identifier order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CachedFragment)> {
        self.entries.iter().map(|(id, cached)| (id.as_str(), cached))
    }

    /// Applies upserts and tombstones from the broker.
    ///
    /// A payload that fails to decode removes the identifier, exactly like a
    /// tombstone, so unusable data never lingers in the cache.
    pub fn apply_records(&mut self, records: Vec<Record>) -> ApplySummary {
        let mut summary = ApplySummary::default();
        for record in records {
            if record.is_deleted() {
                self.entries.remove(&record.id);
                summary.deleted += 1;
                continue;
            }

            match ConfigFragment::decode(record.data.as_deref().unwrap_or_default()) {
                Ok(fragment) => {
                    if let Some(previous) = self.entries.get(&record.id) {
                        if previous.version > record.version {
                            debug!(
                                "databroker: config {} moved back from version {} to {}",
                                record.id, previous.version, record.version
                            );
                        }
                    }
                    self.upsert(record.id, fragment, record.version);
                    summary.upserted += 1;
                }
                Err(err) => {
                    warn!("databroker: error decoding config {}: {err}", record.id);
                    self.entries.remove(&record.id);
                    summary.invalid += 1;
                }
            }
        }
        summary
    }
}
