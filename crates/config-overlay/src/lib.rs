//! Public entry points for the configuration overlay crate.
//!
//! The overlay merges a statically loaded proxy configuration with config
//! fragments synchronised from a data broker, and republishes the result as
//! a live [`Source`]. Transports for the broker plug in through
//! [`Connector`]; this crate performs no network I/O of its own.

pub mod backoff;
pub mod cache;
pub mod config;
pub mod databroker;
pub mod fingerprint;
pub mod fragment;
pub mod options;
pub mod policy;
pub mod service;
pub mod source;
pub mod status;
pub mod syncer;
pub mod telemetry;

pub use backoff::{BackoffConfig, BackoffState};
pub use cache::{ApplySummary, CachedFragment, FragmentCache};
pub use config::SourceEnv;
pub use databroker::{
    Connector, DataBrokerClient, Record, SyncError, SyncEvent, SyncHandler, SyncStream,
    CONFIG_TYPE_URL,
};
pub use fingerprint::{ConnectionFingerprint, ConnectionOptions};
pub use fragment::ConfigFragment;
pub use options::{Config, Options, OptionsError, Settings};
pub use policy::{Policy, PolicyError, RouteId};
pub use service::{
    ConfigInfo, ConfigSource, ConfigSourceBuilder, ConfigSourceError, ConfigSourceTelemetry,
    FragmentInfo, FragmentRejection, RebuildError, SourceConfig,
};
pub use source::{ChangeDispatcher, ChangeListener, Source, StaticSource};
pub use status::{status_json, SourceStatus, StatusSnapshot};
pub use syncer::Syncer;
pub use telemetry::{CompositeTelemetry, CountingTelemetry, TelemetryCounters, TelemetrySnapshot};

#[cfg(test)]
mod tests {
    use super::*;

    /// Ensures callers can derive a `SourceConfig` through the crate root.
    #[test]
    fn env_types_are_reexported() {
        let env = SourceEnv::from_env_iter(vec![("OVERLAY_SOURCE_NAME", "edge")]);
        let config: SourceConfig = env.into_source_config();
        assert_eq!(config.name, "edge");
        assert_eq!(config.type_url, CONFIG_TYPE_URL);
    }

    /// Verifies the status helpers exported at the crate root remain usable.
    #[test]
    fn status_helpers_work_via_reexports() {
        let status = SourceStatus::new();
        status.record_success("abc".into(), 3);
        let json = status_json(&status);
        assert_eq!(json.get("fragments").and_then(|v| v.as_u64()), Some(3));
        assert_eq!(json.get("checksum").and_then(|v| v.as_str()), Some("abc"));
    }
}
