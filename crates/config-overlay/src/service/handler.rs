//! Sync handler wiring broker events into the overlay.

use std::sync::Weak;

use tracing::{debug, error};

use super::core::{RebuildTrigger, SourceShared};
use crate::databroker::{Record, SyncHandler};

/// Forwards syncer events to the overlay that spawned the syncer.
///
/// Holds a weak reference so a running syncer never keeps a dropped overlay
/// alive.
pub(crate) struct SourceSyncHandler {
    shared: Weak<SourceShared>,
}

impl SourceSyncHandler {
    pub fn new(shared: Weak<SourceShared>) -> Self {
        Self { shared }
    }
}

impl SyncHandler for SourceSyncHandler {
    fn clear_records(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.clear_fragments();
        }
    }

    fn update_records(&self, server_version: u64, records: Vec<Record>) {
        if records.is_empty() {
            return;
        }
        let Some(shared) = self.shared.upgrade() else {
            debug!("databroker: overlay dropped, ignoring {} records", records.len());
            return;
        };
        shared.apply_records(server_version, records);
        if let Err(err) = shared.rebuild(RebuildTrigger::RemoteUpdate) {
            error!("{}: rebuild after broker update failed: {err}", shared.name());
        }
    }
}
