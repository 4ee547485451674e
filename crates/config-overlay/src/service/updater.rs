//! Lifecycle of the background syncer.
//!
//! The manager keeps at most one syncer running. It restarts the syncer only
//! when the fingerprint of the broker connection settings changes; a rebuild
//! with unchanged settings leaves the running syncer untouched.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::config::SourceConfig;
use super::telemetry::ConfigSourceTelemetry;
use crate::databroker::{Connector, SyncHandler};
use crate::fingerprint::{ConnectionFingerprint, ConnectionOptions};
use crate::options::{Options, OptionsError};
use crate::syncer::Syncer;

/// Result of reconciling the syncer with new options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReconcileOutcome {
    /// Connection settings are unchanged; the running syncer was kept.
    Unchanged,
    /// A new syncer generation was started.
    Started { generation: u64 },
    /// The channel could not be created; no syncer is running.
    ConnectFailed,
    /// The manager was shut down.
    Stopped,
}

struct ActiveSyncer {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub(crate) struct UpdaterManager {
    connector: Arc<dyn Connector>,
    runtime: Handle,
    config: SourceConfig,
    fingerprint: Option<ConnectionFingerprint>,
    active: Option<ActiveSyncer>,
    generation: u64,
    stopped: bool,
}

impl std::fmt::Debug for UpdaterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdaterManager")
            .field("fingerprint", &self.fingerprint)
            .field("generation", &self.generation)
            .field("running", &self.active.is_some())
            .field("stopped", &self.stopped)
            .finish()
    }
}

impl UpdaterManager {
    pub fn new(connector: Arc<dyn Connector>, runtime: Handle, config: SourceConfig) -> Self {
        Self {
            connector,
            runtime,
            config,
            fingerprint: None,
            active: None,
            generation: 0,
            stopped: false,
        }
    }

    /// Starts, restarts, or keeps the syncer according to `options`.
    ///
    /// Returns an error when the connection settings cannot be resolved. The
    /// running syncer, if any, is left alone in that case.
    pub fn reconcile(
        &mut self,
        options: &Options,
        handler: Arc<dyn SyncHandler>,
        telemetry: &dyn ConfigSourceTelemetry,
    ) -> Result<ReconcileOutcome, OptionsError> {
        if self.stopped {
            return Ok(ReconcileOutcome::Stopped);
        }

        let connection = ConnectionOptions::from_options(options)?;
        let fingerprint = connection.fingerprint();
        if self.fingerprint == Some(fingerprint) {
            return Ok(ReconcileOutcome::Unchanged);
        }

        self.cancel_active();
        // Cleared until a connect succeeds so the next rebuild retries.
        self.fingerprint = None;

        let client = match self.connector.connect(&connection) {
            Ok(client) => client,
            Err(err) => {
                error!(
                    "{}: failed to create data broker connection: {err}",
                    self.config.name
                );
                telemetry.on_connect_error(&err);
                return Ok(ReconcileOutcome::ConnectFailed);
            }
        };

        self.generation += 1;
        let generation = self.generation;
        let cancel = CancellationToken::new();
        let syncer = Syncer::new(
            self.config.name.clone(),
            client,
            handler,
            self.config.type_url.clone(),
            self.config.backoff.clone(),
        );
        let handle = self.runtime.spawn(syncer.run(cancel.clone()));
        info!(
            "{}: started syncer generation {generation} (connection {fingerprint})",
            self.config.name
        );

        self.fingerprint = Some(fingerprint);
        self.active = Some(ActiveSyncer {
            generation,
            cancel,
            handle,
        });
        telemetry.on_syncer_started(generation);
        Ok(ReconcileOutcome::Started { generation })
    }

    /// Number of syncers started so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Stops the syncer for good and hands back its task for joining.
    pub fn shutdown(&mut self) -> Option<JoinHandle<()>> {
        self.stopped = true;
        self.fingerprint = None;
        self.active.take().map(|active| {
            debug!(
                "{}: stopping syncer generation {}",
                self.config.name, active.generation
            );
            active.cancel.cancel();
            active.handle
        })
    }

    #[cfg(test)]
    pub fn cancel_token(&self) -> Option<CancellationToken> {
        self.active.as_ref().map(|active| active.cancel.clone())
    }

    fn cancel_active(&mut self) {
        if let Some(active) = self.active.take() {
            debug!(
                "{}: cancelling syncer generation {}",
                self.config.name, active.generation
            );
            active.cancel.cancel();
        }
    }
}

impl Drop for UpdaterManager {
    fn drop(&mut self) {
        self.cancel_active();
    }
}
