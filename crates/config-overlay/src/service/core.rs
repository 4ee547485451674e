//! Public facade of the configuration overlay.
//!
//! [`ConfigSource`] wraps an underlying [`Source`] and layers config
//! fragments synchronised from the data broker on top of it. Every change of
//! the underlying configuration and every broker update triggers a rebuild;
//! a successful rebuild publishes a new immutable snapshot and notifies the
//! registered listeners.

use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use super::config::SourceConfig;
use super::handler::SourceSyncHandler;
use super::rebuild::{merge_fragments, RebuildError};
use super::state::SourceState;
use super::telemetry::{ConfigInfo, ConfigSourceTelemetry, NoopTelemetry};
use super::updater::{ReconcileOutcome, UpdaterManager};
use crate::cache::CachedFragment;
use crate::databroker::{Connector, Record, SyncHandler};
use crate::options::{Config, OptionsError};
use crate::source::{ChangeDispatcher, ChangeListener, Source};
use crate::status::{SourceStatus, StatusSnapshot};

/// Error type surfaced by overlay operations.
#[derive(Debug, Error)]
pub enum ConfigSourceError {
    /// Data broker connection settings could not be resolved.
    #[error("invalid data broker connection settings: {0}")]
    Connection(#[source] OptionsError),
    /// No tokio runtime was provided or is current.
    #[error("no tokio runtime available to run the data broker syncer")]
    NoRuntime,
    /// The rebuild was aborted; the previous snapshot stays published.
    #[error(transparent)]
    Rebuild(#[from] RebuildError),
}

/// What caused a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RebuildTrigger {
    /// The build run while constructing the overlay. Never notifies.
    Initial,
    /// The underlying source published a new configuration.
    UnderlyingChange,
    /// The broker delivered a non-empty batch of records.
    RemoteUpdate,
}

pub(crate) struct SourceShared {
    config: SourceConfig,
    state: RwLock<SourceState>,
    dispatcher: ChangeDispatcher,
    /// Sequence number of the last snapshot handed to listeners.
    dispatched: Mutex<u64>,
    telemetry: Arc<dyn ConfigSourceTelemetry>,
    status: SourceStatus,
}

impl SourceShared {
    pub(crate) fn name(&self) -> &str {
        &self.config.name
    }

    fn read_state(&self) -> RwLockReadGuard<'_, SourceState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, SourceState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn clear_fragments(&self) {
        let mut state = self.write_state();
        debug!(
            "{}: clearing {} cached configs",
            self.config.name,
            state.fragments.len()
        );
        state.fragments.clear();
    }

    pub(crate) fn apply_records(&self, server_version: u64, records: Vec<Record>) {
        let summary = self.write_state().fragments.apply_records(records);
        debug!(
            "{}: applied records at server version {server_version}: {} upserted, {} deleted, {} invalid",
            self.config.name, summary.upserted, summary.deleted, summary.invalid
        );
    }

    fn on_underlying_change(self: &Arc<Self>, config: &Config) {
        let mut state = self.write_state();
        state.underlying = config.clone();
        if !state.built {
            debug!(
                "{}: underlying config changed before the initial build",
                self.config.name
            );
            return;
        }
        drop(state);
        if let Err(err) = self.rebuild(RebuildTrigger::UnderlyingChange) {
            error!(
                "{}: rebuild after underlying config change failed: {err}",
                self.config.name
            );
        }
    }

    /// Recomputes the published configuration.
    ///
    /// The state lock is held for the whole computation, so rebuilds never
    /// interleave. Listeners run after the lock is released.
    pub(crate) fn rebuild(
        self: &Arc<Self>,
        trigger: RebuildTrigger,
    ) -> Result<Arc<Config>, ConfigSourceError> {
        let mut state = self.write_state();
        state.built = true;
        let working = state.underlying.clone();
        let services = working.options.services.clone();

        let handler: Arc<dyn SyncHandler> =
            Arc::new(SourceSyncHandler::new(Arc::downgrade(self)));
        match state
            .updater
            .reconcile(&working.options, handler, self.telemetry.as_ref())
        {
            Ok(ReconcileOutcome::Started { generation }) => self.status.set_generation(generation),
            Ok(_) => {}
            Err(err) => {
                error!(
                    "{}: cannot resolve data broker connection settings: {err}",
                    self.config.name
                );
                self.report_failure(services, err.to_string());
                return Err(ConfigSourceError::Connection(err));
            }
        }

        let merged = match merge_fragments(working, &state.fragments, self.telemetry.as_ref()) {
            Ok(merged) => merged,
            Err(err) => {
                warn!(
                    "{}: rebuild aborted, keeping previous config: {err}",
                    self.config.name
                );
                self.report_failure(services, err.to_string());
                return Err(err.into());
            }
        };

        let computed = Arc::new(merged);
        let checksum = computed.checksum();
        state.computed = computed.clone();
        state.published += 1;
        let sequence = state.published;
        self.status
            .record_success(checksum.clone(), state.fragments.len());
        drop(state);

        debug!(
            "{}: published config {checksum} ({trigger:?})",
            self.config.name
        );
        self.telemetry.on_config_info(&ConfigInfo {
            services,
            source: self.config.name.clone(),
            checksum,
            success: true,
        });

        if trigger != RebuildTrigger::Initial {
            self.notify(sequence, computed.clone());
        }
        Ok(computed)
    }

    /// Hands a snapshot to the listeners unless a newer one already went out.
    fn notify(&self, sequence: u64, config: Arc<Config>) {
        let mut dispatched = self
            .dispatched
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if sequence <= *dispatched {
            debug!(
                "{}: skipping notification for superseded config",
                self.config.name
            );
            return;
        }
        *dispatched = sequence;
        self.dispatcher.trigger(config);
    }

    fn report_failure(&self, services: String, error: String) {
        self.status.record_failure(error);
        self.telemetry.on_config_info(&ConfigInfo {
            services,
            source: self.config.name.clone(),
            checksum: String::new(),
            success: false,
        });
    }
}

/// Configuration source that overlays data broker fragments on a base source.
///
/// Cloning is cheap; clones share the same state and syncer.
#[derive(Clone)]
pub struct ConfigSource {
    shared: Arc<SourceShared>,
}

impl std::fmt::Debug for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigSource")
            .field("name", &self.shared.config.name)
            .field("listeners", &self.shared.dispatcher.len())
            .finish()
    }
}

impl ConfigSource {
    /// Starts building an overlay with default settings.
    pub fn builder() -> ConfigSourceBuilder {
        ConfigSourceBuilder::default()
    }

    /// Creates an overlay with default settings on the current tokio runtime.
    pub fn new(
        underlying: &dyn Source,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ConfigSourceError> {
        Self::builder().build(underlying, connector)
    }

    /// Handler feeding broker events into this overlay.
    ///
    /// The running syncer already uses an equivalent handler; this is for
    /// embedders that drive the overlay from their own sync loop.
    pub fn sync_handler(&self) -> Arc<dyn SyncHandler> {
        Arc::new(SourceSyncHandler::new(Arc::downgrade(&self.shared)))
    }

    /// Cached fragment stored under `id`.
    pub fn fragment(&self, id: &str) -> Option<CachedFragment> {
        self.shared.read_state().fragments.get(id).cloned()
    }

    /// Identifiers of the cached fragments, in merge order.
    pub fn fragment_ids(&self) -> Vec<String> {
        self.shared
            .read_state()
            .fragments
            .iter()
            .map(|(id, _)| id.to_string())
            .collect()
    }

    /// Outcome of the most recent rebuild.
    pub fn status(&self) -> StatusSnapshot {
        self.shared.status.snapshot()
    }

    /// Number of syncer generations started so far.
    pub fn updater_generation(&self) -> u64 {
        self.shared.read_state().updater.generation()
    }

    /// Stops the syncer and waits for its task to finish.
    ///
    /// The overlay keeps serving its last snapshot and still follows the
    /// underlying source, but no syncer is started again.
    pub async fn shutdown(&self) {
        let handle = self.shared.write_state().updater.shutdown();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!("{}: syncer task failed: {err}", self.shared.config.name);
            }
        }
    }
}

impl Source for ConfigSource {
    fn get_config(&self) -> Arc<Config> {
        self.shared.read_state().computed.clone()
    }

    fn on_config_change(&self, listener: ChangeListener) {
        self.shared.dispatcher.on_config_change(listener);
    }
}

/// Builder for [`ConfigSource`].
pub struct ConfigSourceBuilder {
    config: SourceConfig,
    telemetry: Arc<dyn ConfigSourceTelemetry>,
    listeners: Vec<ChangeListener>,
    runtime: Option<Handle>,
}

impl Default for ConfigSourceBuilder {
    fn default() -> Self {
        Self {
            config: SourceConfig::default(),
            telemetry: Arc::new(NoopTelemetry),
            listeners: Vec::new(),
            runtime: None,
        }
    }
}

impl std::fmt::Debug for ConfigSourceBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigSourceBuilder")
            .field("config", &self.config)
            .field("listeners", &self.listeners.len())
            .field("runtime", &self.runtime.is_some())
            .finish()
    }
}

impl ConfigSourceBuilder {
    pub fn config(mut self, config: SourceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn ConfigSourceTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Registers a listener before the initial build.
    pub fn listener(mut self, listener: ChangeListener) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Runtime the syncer is spawned on. Defaults to the current runtime.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Subscribes to `underlying` and runs the initial build.
    ///
    /// The initial build does not notify listeners. If it is aborted by a
    /// rejected fragment or base policy, the underlying configuration is
    /// published as is. Unresolvable broker connection settings fail the
    /// construction.
    pub fn build(
        self,
        underlying: &dyn Source,
        connector: Arc<dyn Connector>,
    ) -> Result<ConfigSource, ConfigSourceError> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| ConfigSourceError::NoRuntime)?,
        };
        let config = self.config.sanitise();
        let updater = UpdaterManager::new(connector, runtime, config.clone());

        let shared = Arc::new(SourceShared {
            config,
            state: RwLock::new(SourceState::new(underlying.get_config(), updater)),
            dispatcher: ChangeDispatcher::new(),
            dispatched: Mutex::new(0),
            telemetry: self.telemetry,
            status: SourceStatus::new(),
        });
        for listener in self.listeners {
            shared.dispatcher.on_config_change(listener);
        }

        let weak = Arc::downgrade(&shared);
        underlying.on_config_change(Arc::new(move |config: Arc<Config>| {
            if let Some(shared) = weak.upgrade() {
                shared.on_underlying_change(&config);
            }
        }));
        // Picks up a change published between get_config and registration.
        shared.write_state().underlying = (*underlying.get_config()).clone();

        match shared.rebuild(RebuildTrigger::Initial) {
            Ok(_) | Err(ConfigSourceError::Rebuild(_)) => {}
            Err(err) => return Err(err),
        }
        Ok(ConfigSource { shared })
    }
}
