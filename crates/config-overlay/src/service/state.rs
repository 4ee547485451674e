//! Mutable overlay state guarded by the service lock.

use std::sync::Arc;

use super::updater::UpdaterManager;
use crate::cache::FragmentCache;
use crate::options::Config;

pub(crate) struct SourceState {
    /// Last published snapshot.
    pub computed: Arc<Config>,
    /// Latest configuration from the underlying source.
    pub underlying: Config,
    /// Fragments received from the broker.
    pub fragments: FragmentCache,
    pub updater: UpdaterManager,
    /// Sequence number of the last publication; orders notifications.
    pub published: u64,
    /// Set once the initial build ran. Base changes seen earlier are only stored.
    pub built: bool,
}

impl SourceState {
    pub fn new(base: Arc<Config>, updater: UpdaterManager) -> Self {
        Self {
            underlying: (*base).clone(),
            computed: base,
            fragments: FragmentCache::new(),
            updater,
            published: 0,
            built: false,
        }
    }
}
