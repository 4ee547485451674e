//! Background resync loop feeding broker events to a [`SyncHandler`].
//!
//! A syncer keeps one sync stream open at a time. Whenever the stream ends or
//! fails it is re-opened after an exponential backoff, and the broker's
//! initial `Clear` re-establishes the baseline. Cancellation is raced against
//! every await so a replaced syncer stops quickly.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backoff::{BackoffConfig, BackoffState};
use crate::databroker::{DataBrokerClient, SyncError, SyncEvent, SyncHandler};

/// How a sync session ended.
#[derive(Debug)]
enum SessionEnd {
    /// The cancellation token fired.
    Cancelled,
    /// The stream failed or closed after `events` events.
    Interrupted { events: usize, error: SyncError },
}

/// Drives a broker sync stream for one connection generation.
pub struct Syncer {
    name: String,
    client: Arc<dyn DataBrokerClient>,
    handler: Arc<dyn SyncHandler>,
    type_url: String,
    backoff: BackoffConfig,
}

impl std::fmt::Debug for Syncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Syncer")
            .field("name", &self.name)
            .field("type_url", &self.type_url)
            .finish()
    }
}

impl Syncer {
    /// Creates a syncer for records of `type_url`.
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn DataBrokerClient>,
        handler: Arc<dyn SyncHandler>,
        type_url: impl Into<String>,
        backoff: BackoffConfig,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            handler,
            type_url: type_url.into(),
            backoff,
        }
    }

    /// Runs until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut backoff = BackoffState::new(self.backoff.clone());
        loop {
            match self.run_session(&cancel).await {
                SessionEnd::Cancelled => break,
                SessionEnd::Interrupted { events, error } => {
                    if events > 0 {
                        backoff.register_success();
                    }
                    let delay = backoff.register_error();
                    warn!(
                        "{}: sync interrupted after {events} events, retrying in {delay:?}: {error}",
                        self.name
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = sleep(delay) => {}
                    }
                }
            }
        }
        debug!("{}: syncer for {} stopped", self.name, self.type_url);
    }

    /// Opens one stream and forwards its events until it ends.
    async fn run_session(&self, cancel: &CancellationToken) -> SessionEnd {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            opened = self.client.sync(&self.type_url) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(error) => return SessionEnd::Interrupted { events: 0, error },
        };

        let mut events = 0usize;
        let mut baseline = false;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                next = stream.next() => next,
            };
            // The token may have fired while the event was in flight.
            if cancel.is_cancelled() {
                return SessionEnd::Cancelled;
            }
            match next {
                None => {
                    return SessionEnd::Interrupted {
                        events,
                        error: SyncError::Closed,
                    }
                }
                Some(Err(error)) => return SessionEnd::Interrupted { events, error },
                Some(Ok(SyncEvent::Clear)) => {
                    baseline = true;
                    self.handler.clear_records();
                }
                Some(Ok(SyncEvent::Update {
                    server_version,
                    records,
                })) => {
                    if !baseline {
                        warn!(
                            "{}: update received before the initial clear, resetting records",
                            self.name
                        );
                        self.handler.clear_records();
                        baseline = true;
                    }
                    self.handler.update_records(server_version, records);
                }
            }
            events += 1;
        }
    }
}
