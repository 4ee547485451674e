//! In-memory data broker serving the sync API.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use config_overlay::{
    ConnectionOptions, Connector, DataBrokerClient, Record, SyncError, SyncEvent, SyncStream,
};
use futures_util::{stream, StreamExt};
use time::OffsetDateTime;
use tokio::sync::mpsc;

type Subscriber = mpsc::UnboundedSender<Result<SyncEvent, SyncError>>;

#[derive(Default)]
struct BrokerState {
    server_version: u64,
    records: BTreeMap<String, Record>,
    subscribers: Vec<(String, Subscriber)>,
}

/// Broker keeping records in memory and pushing changes to open streams.
///
/// A new stream receives `Clear` followed by every live record, then each
/// later change as its own batch.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    connects: Arc<Mutex<Vec<ConnectionOptions>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a fragment payload under `id` and broadcasts it.
    pub fn put(&self, id: &str, data: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        state.server_version += 1;
        let version = state.server_version;
        let record = Record::upsert(id, version, data);
        state.records.insert(id.to_string(), record.clone());
        broadcast(&mut state, version, record);
    }

    /// Deletes `id` and broadcasts the tombstone.
    pub fn delete(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.server_version += 1;
        let version = state.server_version;
        state.records.remove(id);
        let record = Record::tombstone(id, version, OffsetDateTime::now_utc());
        broadcast(&mut state, version, record);
    }

    /// Deletes `id` without telling open streams.
    pub fn delete_silently(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.server_version += 1;
        state.records.remove(id);
    }

    /// Fails every open stream.
    pub fn drop_streams(&self) {
        let mut state = self.state.lock().unwrap();
        for (_, tx) in state.subscribers.drain(..) {
            let _ = tx.send(Err(SyncError::Stream("connection reset".into())));
        }
    }

    /// Streams currently being consumed, keyed by broker address.
    pub fn open_streams(&self) -> Vec<String> {
        let mut state = self.state.lock().unwrap();
        state.subscribers.retain(|(_, tx)| !tx.is_closed());
        state
            .subscribers
            .iter()
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    /// Settings of every connect so far.
    pub fn connects(&self) -> Vec<ConnectionOptions> {
        self.connects.lock().unwrap().clone()
    }

    fn subscribe(&self, addr: String) -> SyncStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap();
        let _ = tx.send(Ok(SyncEvent::Clear));
        if !state.records.is_empty() {
            let _ = tx.send(Ok(SyncEvent::Update {
                server_version: state.server_version,
                records: state.records.values().cloned().collect(),
            }));
        }
        state.subscribers.push((addr, tx));
        stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed()
    }
}

fn broadcast(state: &mut BrokerState, server_version: u64, record: Record) {
    state.subscribers.retain(|(_, tx)| {
        tx.send(Ok(SyncEvent::Update {
            server_version,
            records: vec![record.clone()],
        }))
        .is_ok()
    });
}

impl Connector for InMemoryBroker {
    fn connect(&self, options: &ConnectionOptions) -> Result<Arc<dyn DataBrokerClient>, SyncError> {
        self.connects.lock().unwrap().push(options.clone());
        let addr = options
            .addrs
            .first()
            .map(|url| url.to_string())
            .ok_or_else(|| SyncError::Connect("no broker address".into()))?;
        Ok(Arc::new(BrokerClient {
            broker: self.clone(),
            addr,
        }))
    }
}

struct BrokerClient {
    broker: InMemoryBroker,
    addr: String,
}

#[async_trait]
impl DataBrokerClient for BrokerClient {
    async fn sync(&self, _type_url: &str) -> Result<SyncStream, SyncError> {
        Ok(self.broker.subscribe(self.addr.clone()))
    }
}
