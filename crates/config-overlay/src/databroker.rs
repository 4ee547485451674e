//! Interface to the data broker's record sync API.
//!
//! The broker exposes a streaming `sync` call filtered by record type. A
//! stream starts with [`SyncEvent::Clear`] to establish a fresh baseline and
//! then delivers batches of record upserts and tombstones. Transports plug in
//! through [`Connector`]; the overlay never talks to the network directly.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;
use time::OffsetDateTime;

use crate::fingerprint::ConnectionOptions;

/// Record type holding config fragments.
pub const CONFIG_TYPE_URL: &str = "type.googleapis.com/overlay.config.Config";

/// A versioned record as delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record identifier, unique per type.
    pub id: String,
    /// Record type.
    pub type_url: String,
    /// Record version, non-decreasing per identifier.
    pub version: u64,
    /// Encoded payload. Absent on tombstones.
    pub data: Option<Vec<u8>>,
    /// Deletion timestamp. Present on tombstones.
    pub deleted_at: Option<OffsetDateTime>,
}

impl Record {
    /// Builds an upsert record of the config type.
    pub fn upsert(id: impl Into<String>, version: u64, data: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            type_url: CONFIG_TYPE_URL.to_string(),
            version,
            data: Some(data),
            deleted_at: None,
        }
    }

    /// Builds a tombstone record of the config type.
    pub fn tombstone(id: impl Into<String>, version: u64, deleted_at: OffsetDateTime) -> Self {
        Self {
            id: id.into(),
            type_url: CONFIG_TYPE_URL.to_string(),
            version,
            data: None,
            deleted_at: Some(deleted_at),
        }
    }

    /// Returns whether the record marks a deletion.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Message received on a sync stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Drop every cached record; a new baseline follows.
    Clear,
    /// Apply a batch of records.
    Update {
        server_version: u64,
        records: Vec<Record>,
    },
}

/// Failures raised by broker transports.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// The channel to the broker could not be created.
    #[error("failed to connect to data broker: {0}")]
    Connect(String),
    /// Opening or reading the sync stream failed.
    #[error("data broker sync stream failed: {0}")]
    Stream(String),
    /// The broker closed the stream.
    #[error("data broker closed the sync stream")]
    Closed,
}

/// Stream of sync events.
pub type SyncStream = BoxStream<'static, Result<SyncEvent, SyncError>>;

/// Client side of the broker sync API.
#[async_trait]
pub trait DataBrokerClient: Send + Sync {
    /// Opens a sync stream restricted to records of `type_url`.
    async fn sync(&self, type_url: &str) -> Result<SyncStream, SyncError>;
}

/// Creates broker clients from connection settings.
///
/// `connect` must not block on network I/O: it is called while the overlay
/// holds its state lock. Dialing happens lazily inside
/// [`DataBrokerClient::sync`].
pub trait Connector: Send + Sync {
    /// Builds a client for the given settings.
    fn connect(&self, options: &ConnectionOptions) -> Result<Arc<dyn DataBrokerClient>, SyncError>;
}

/// Receives sync events from a running syncer.
pub trait SyncHandler: Send + Sync {
    /// Drops every cached record.
    fn clear_records(&self);
    /// Applies a batch of records received at `server_version`.
    fn update_records(&self, server_version: u64, records: Vec<Record>);
}
