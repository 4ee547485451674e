//! Environment-driven helpers for configuring the overlay service.
//!
//! This module derives a [`SourceConfig`] from the host process environment.
//! Unset or unparsable variables fall back to the defaults, so an empty
//! environment yields the stock configuration.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::service::config::MAX_BACKOFF_CAP;
use crate::service::SourceConfig;

/// Name reported for the overlay in logs and config-info records.
const ENV_SOURCE_NAME: &str = "OVERLAY_SOURCE_NAME";
/// Record type requested from the data broker.
const ENV_TYPE_URL: &str = "OVERLAY_SYNC_TYPE_URL";
/// Base retry delay for the sync stream, in seconds.
const ENV_BACKOFF_BASE: &str = "OVERLAY_SYNC_BACKOFF_BASE_SECS";
/// Maximum retry delay for the sync stream, in seconds.
const ENV_BACKOFF_MAX: &str = "OVERLAY_SYNC_BACKOFF_MAX_SECS";

/// Captures environment-derived overlay options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceEnv {
    pub source_name: Option<String>,
    pub type_url: Option<String>,
    pub backoff_base_secs: Option<f64>,
    pub backoff_max_secs: Option<f64>,
}

impl SourceEnv {
    /// Builds settings from the current process environment.
    pub fn from_os_env() -> Self {
        Self::from_env_iter(env::vars())
    }

    /// Builds settings from an iterator of key/value pairs (typically for tests).
    pub fn from_env_iter<I, K, V>(iter: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        Self {
            source_name: map.get(ENV_SOURCE_NAME).and_then(|v| sanitize_non_empty(v)),
            type_url: map.get(ENV_TYPE_URL).and_then(|v| sanitize_non_empty(v)),
            backoff_base_secs: map.get(ENV_BACKOFF_BASE).and_then(|v| parse_secs(v)),
            backoff_max_secs: map.get(ENV_BACKOFF_MAX).and_then(|v| parse_secs(v)),
        }
    }

    /// Applies the captured values on top of the default [`SourceConfig`].
    pub fn into_source_config(self) -> SourceConfig {
        let mut config = SourceConfig::default();
        if let Some(name) = self.source_name {
            config.name = name;
        }
        if let Some(type_url) = self.type_url {
            config.type_url = type_url;
        }
        if let Some(base) = self.backoff_base_secs {
            config.backoff.base_seconds = base;
        }
        if let Some(max) = self.backoff_max_secs {
            config.backoff.max_backoff = Duration::try_from_secs_f64(max)
                .map_or(MAX_BACKOFF_CAP, |max| max.min(MAX_BACKOFF_CAP));
        }
        config
    }
}

/// Helper trimming whitespace and discarding empty values.
fn sanitize_non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parses a non-negative, finite number of seconds.
fn parse_secs(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
}
