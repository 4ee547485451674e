//! Static configuration for the overlay service.

use std::time::Duration;

use tracing::warn;

use crate::backoff::BackoffConfig;
use crate::databroker::CONFIG_TYPE_URL;

/// Source name reported in config-info records.
pub const DEFAULT_SOURCE_NAME: &str = "databroker";
/// Smallest base delay accepted for sync retries.
pub const MIN_BACKOFF_BASE: Duration = Duration::from_millis(100);
/// Largest retry delay accepted for sync retries.
pub const MAX_BACKOFF_CAP: Duration = Duration::from_secs(5 * 60);

/// Configuration values that control the overlay service.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Name used for logs and config-info records.
    pub name: String,
    /// Record type requested from the broker.
    pub type_url: String,
    /// Retry policy for the sync stream.
    pub backoff: BackoffConfig,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_SOURCE_NAME.into(),
            type_url: CONFIG_TYPE_URL.into(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl SourceConfig {
    /// Clamps values that would make the syncer spin or stall.
    pub(crate) fn sanitise(mut self) -> Self {
        if self.name.trim().is_empty() {
            warn!("empty source name; using {DEFAULT_SOURCE_NAME:?}");
            self.name = DEFAULT_SOURCE_NAME.into();
        }
        if self.type_url.trim().is_empty() {
            warn!("empty sync type url; using {CONFIG_TYPE_URL:?}");
            self.type_url = CONFIG_TYPE_URL.into();
        }

        let defaults = BackoffConfig::default();
        let min_base = MIN_BACKOFF_BASE.as_secs_f64();
        if !self.backoff.base_seconds.is_finite() || self.backoff.base_seconds < min_base {
            warn!(
                "sync backoff base {}s is below the minimum {min_base}s; clamping",
                self.backoff.base_seconds
            );
            self.backoff.base_seconds = min_base;
        }
        if !self.backoff.factor.is_finite() || self.backoff.factor < 1.0 {
            warn!(
                "sync backoff factor {} must be >= 1; using {}",
                self.backoff.factor, defaults.factor
            );
            self.backoff.factor = defaults.factor;
        }
        if self.backoff.max_backoff > MAX_BACKOFF_CAP {
            warn!(
                "sync backoff max {:?} above maximum {MAX_BACKOFF_CAP:?}; reducing",
                self.backoff.max_backoff
            );
            self.backoff.max_backoff = MAX_BACKOFF_CAP;
        }
        let max_base = MAX_BACKOFF_CAP.as_secs_f64();
        if self.backoff.base_seconds > max_base {
            warn!(
                "sync backoff base {}s is above the maximum {max_base}s; clamping",
                self.backoff.base_seconds
            );
            self.backoff.base_seconds = max_base;
        }
        let base = Duration::from_secs_f64(self.backoff.base_seconds);
        if self.backoff.max_backoff < base {
            warn!(
                "sync backoff max {:?} below base {base:?}; raising",
                self.backoff.max_backoff
            );
            self.backoff.max_backoff = base;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitise_restores_blank_names() {
        let config = SourceConfig {
            name: " ".into(),
            type_url: String::new(),
            ..Default::default()
        }
        .sanitise();
        assert_eq!(config.name, DEFAULT_SOURCE_NAME);
        assert_eq!(config.type_url, CONFIG_TYPE_URL);
    }

    #[test]
    fn sanitise_clamps_backoff() {
        let config = SourceConfig {
            backoff: BackoffConfig {
                base_seconds: 0.0,
                factor: 0.5,
                max_backoff: Duration::from_secs(3600),
                ..Default::default()
            },
            ..Default::default()
        }
        .sanitise();
        assert_eq!(config.backoff.base_seconds, MIN_BACKOFF_BASE.as_secs_f64());
        assert_eq!(config.backoff.factor, BackoffConfig::default().factor);
        assert_eq!(config.backoff.max_backoff, MAX_BACKOFF_CAP);
    }

    #[test]
    fn sanitise_caps_huge_base() {
        let config = SourceConfig {
            backoff: BackoffConfig {
                base_seconds: 1e30,
                ..Default::default()
            },
            ..Default::default()
        }
        .sanitise();
        assert_eq!(config.backoff.base_seconds, MAX_BACKOFF_CAP.as_secs_f64());
        assert_eq!(config.backoff.max_backoff, MAX_BACKOFF_CAP);
    }
}
