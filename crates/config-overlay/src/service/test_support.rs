//! Shared fixtures and utilities for overlay service tests.
//!
//! Consolidating these helpers keeps individual test modules focused on their
//! assertions while avoiding duplication of setup logic.

#![cfg(test)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::databroker::{
    Connector, DataBrokerClient, Record, SyncError, SyncEvent, SyncHandler, SyncStream,
};
use crate::fingerprint::ConnectionOptions;
use crate::options::{Config, Options};
use crate::policy::Policy;

/// Route present in every base configuration built by [`base_config`].
pub(crate) const BASE_ROUTE: &str = "https://base.example.com";

type EventSender = mpsc::UnboundedSender<Result<SyncEvent, SyncError>>;

/// Handler that ignores every event.
pub(crate) struct NullHandler;

impl SyncHandler for NullHandler {
    fn clear_records(&self) {}

    fn update_records(&self, _server_version: u64, _records: Vec<Record>) {}
}

/// Connector counting `connect` calls whose clients serve channel-backed streams.
///
/// Every `sync` call opens a new session; tests push events into the most
/// recent one with [`CountingConnector::send`]. Sessions without events stay
/// pending.
#[derive(Default)]
pub(crate) struct CountingConnector {
    connects: AtomicUsize,
    failures: AtomicUsize,
    options: Mutex<Vec<ConnectionOptions>>,
    sessions: Arc<Mutex<Vec<EventSender>>>,
}

impl CountingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` connects fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Successful connects so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Connection settings of the most recent successful connect.
    pub fn last_options(&self) -> Option<ConnectionOptions> {
        self.options.lock().unwrap().last().cloned()
    }

    /// Sync streams opened so far.
    pub fn sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Whether the consumer of the most recent session went away.
    pub fn latest_session_closed(&self) -> bool {
        self.sessions
            .lock()
            .unwrap()
            .last()
            .map_or(true, |tx| tx.is_closed())
    }

    /// Pushes an event into the most recent session.
    pub fn send(&self, event: SyncEvent) {
        let sessions = self.sessions.lock().unwrap();
        let tx = sessions.last().expect("no sync session open");
        tx.send(Ok(event)).expect("sync session closed");
    }

    /// Waits until at least `count` sessions were opened.
    pub async fn wait_for_sessions(&self, count: usize) {
        wait_until(|| self.sessions() >= count).await;
    }
}

impl Connector for CountingConnector {
    fn connect(&self, options: &ConnectionOptions) -> Result<Arc<dyn DataBrokerClient>, SyncError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SyncError::Connect("connection refused".into()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.options.lock().unwrap().push(options.clone());
        Ok(Arc::new(ChannelClient {
            sessions: self.sessions.clone(),
        }))
    }
}

struct ChannelClient {
    sessions: Arc<Mutex<Vec<EventSender>>>,
}

#[async_trait]
impl DataBrokerClient for ChannelClient {
    async fn sync(&self, _type_url: &str) -> Result<SyncStream, SyncError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.lock().unwrap().push(tx);
        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed())
    }
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}

/// Runs `future` with a five second deadline.
pub(crate) async fn with_deadline<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("deadline exceeded")
}

/// Base configuration with a single route.
pub(crate) fn base_config() -> Config {
    Config::new(Options {
        policies: vec![Policy::new(BASE_ROUTE, "http://base.internal")],
        ..Default::default()
    })
}

/// Raw route declaration as carried by fragments.
pub(crate) fn route(from: &str) -> Value {
    json!({ "from": from, "to": ["http://upstream.internal"] })
}

/// Encoded fragment with the given settings and routes.
pub(crate) fn fragment_payload(settings: Value, routes: Vec<Value>) -> Vec<u8> {
    serde_json::to_vec(&json!({ "settings": settings, "routes": routes })).unwrap()
}

/// Upsert of a fragment carrying only routes.
pub(crate) fn routes_record(id: &str, version: u64, routes: Vec<Value>) -> Record {
    Record::upsert(id, version, fragment_payload(json!({}), routes))
}

/// Froms of every route in `config`, base routes first.
pub(crate) fn route_froms(config: &Config) -> Vec<String> {
    config
        .options
        .all_policies()
        .map(|policy| policy.from.clone())
        .collect()
}
