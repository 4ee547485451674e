//! Proxy configuration model shared by the base source and the overlay.
//!
//! [`Config`] is what the static loader hands to the overlay and also what
//! the overlay publishes once remote fragments have been applied. Fragment
//! [`Settings`] only carry the subset of [`Options`] that may be changed at
//! runtime; connection settings for the data broker are never overridden
//! remotely.

use std::collections::BTreeMap;
use std::time::Duration;

use data_encoding::BASE64;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::policy::{Policy, PolicyError};

/// Data broker address used when the configuration lists none.
pub const DEFAULT_DATABROKER_URL: &str = "http://127.0.0.1:5443";
/// Service scopes the proxy can run as.
pub const VALID_SERVICES: [&str; 5] = ["all", "proxy", "authenticate", "authorize", "databroker"];
/// Log levels accepted by `log_level`.
pub const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Errors raised while validating options or resolving connection settings.
#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("invalid service mode {0:?}")]
    InvalidService(String),
    #[error("invalid log level {0:?}")]
    InvalidLogLevel(String),
    #[error("address must not be empty")]
    EmptyAddress,
    #[error("invalid cookie name {0:?}")]
    InvalidCookieName(String),
    #[error("shared key is not valid base64")]
    InvalidSharedKey,
    #[error("invalid data broker url {url:?}: {source}")]
    InvalidDatabrokerUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid policy #{index}: {source}")]
    Policy {
        index: usize,
        #[source]
        source: PolicyError,
    },
}

/// Complete proxy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Config {
    pub options: Options,
}

impl Config {
    /// Wraps options into a configuration.
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    /// Hex-encoded SHA-256 of the serialised configuration.
    ///
    /// Every map in the model is ordered, so equal configurations always
    /// produce equal checksums.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        // Serialising plain structs and ordered maps into a Vec cannot fail.
        if let Ok(encoded) = serde_json::to_vec(self) {
            hasher.update(&encoded);
        }
        hex::encode(hasher.finalize())
    }
}

/// Proxy options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Service scope the process runs as (`all`, `proxy`, ...).
    pub services: String,
    /// Listen address for the proxy.
    pub address: String,
    /// Minimum log level.
    pub log_level: String,
    /// Session cookie name.
    pub cookie_name: String,
    /// Upstream timeout applied to routes without an explicit timeout.
    pub default_upstream_timeout: Duration,
    /// Identity claims forwarded to upstreams as headers.
    pub jwt_claims_headers: BTreeMap<String, String>,
    /// Data broker addresses.
    pub databroker_urls: Vec<String>,
    /// Base64-encoded key used to sign requests to the data broker.
    pub shared_key: String,
    /// Inline PEM certificate authority.
    pub ca: String,
    /// Path to a PEM certificate authority.
    pub ca_file: String,
    /// Overrides the server name expected in the broker certificate.
    pub override_certificate_name: String,
    /// Per-request timeout for data broker calls.
    pub grpc_client_timeout: Duration,
    /// Enables DNS round-robin load balancing across broker addresses.
    pub grpc_client_dns_round_robin: bool,
    /// Disables TLS towards the broker.
    pub grpc_insecure: bool,
    /// Statically configured routes.
    pub policies: Vec<Policy>,
    /// Routes derived at runtime. Cleared by [`Options::validate`].
    pub additional_policies: Vec<Policy>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            services: "all".into(),
            address: ":443".into(),
            log_level: "info".into(),
            cookie_name: "_overlay".into(),
            default_upstream_timeout: Duration::from_secs(30),
            jwt_claims_headers: BTreeMap::new(),
            databroker_urls: Vec::new(),
            shared_key: String::new(),
            ca: String::new(),
            ca_file: String::new(),
            override_certificate_name: String::new(),
            grpc_client_timeout: Duration::from_secs(10),
            grpc_client_dns_round_robin: false,
            grpc_insecure: false,
            policies: Vec::new(),
            additional_policies: Vec::new(),
        }
    }
}

impl Options {
    /// Overlays every setting present in a fragment.
    pub fn apply_settings(&mut self, settings: &Settings) {
        if let Some(address) = &settings.address {
            self.address = address.clone();
        }
        if let Some(log_level) = &settings.log_level {
            self.log_level = log_level.clone();
        }
        if let Some(cookie_name) = &settings.cookie_name {
            self.cookie_name = cookie_name.clone();
        }
        if let Some(timeout_ms) = settings.default_upstream_timeout_ms {
            self.default_upstream_timeout = Duration::from_millis(timeout_ms);
        }
        if let Some(headers) = &settings.jwt_claims_headers {
            self.jwt_claims_headers = headers.clone();
        }
    }

    /// Validates the options.
    ///
    /// Resets `additional_policies` before checking anything else: derived
    /// routes must be appended only after a successful validation.
    pub fn validate(&mut self) -> Result<(), OptionsError> {
        self.additional_policies.clear();

        if !VALID_SERVICES.contains(&self.services.as_str()) {
            return Err(OptionsError::InvalidService(self.services.clone()));
        }
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(OptionsError::InvalidLogLevel(self.log_level.clone()));
        }
        if self.address.trim().is_empty() {
            return Err(OptionsError::EmptyAddress);
        }
        if self.cookie_name.is_empty()
            || self
                .cookie_name
                .chars()
                .any(|c| c.is_whitespace() || c == ';' || c == '=' || c == ',')
        {
            return Err(OptionsError::InvalidCookieName(self.cookie_name.clone()));
        }
        self.decoded_shared_key()?;
        self.databroker_urls()?;

        for (index, policy) in self.policies.iter().enumerate() {
            policy
                .validate()
                .map_err(|source| OptionsError::Policy { index, source })?;
        }
        Ok(())
    }

    /// Iterates over base and derived policies.
    pub fn all_policies(&self) -> impl Iterator<Item = &Policy> {
        self.policies.iter().chain(self.additional_policies.iter())
    }

    /// Resolves the data broker address list.
    pub fn databroker_urls(&self) -> Result<Vec<Url>, OptionsError> {
        if self.databroker_urls.is_empty() {
            return parse_databroker_url(DEFAULT_DATABROKER_URL).map(|url| vec![url]);
        }
        self.databroker_urls
            .iter()
            .map(|raw| parse_databroker_url(raw))
            .collect()
    }

    /// Decodes the shared signing key (empty when unset).
    pub fn decoded_shared_key(&self) -> Result<Vec<u8>, OptionsError> {
        BASE64
            .decode(self.shared_key.trim().as_bytes())
            .map_err(|_| OptionsError::InvalidSharedKey)
    }
}

/// Runtime-adjustable settings carried by a config fragment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_upstream_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt_claims_headers: Option<BTreeMap<String, String>>,
}

/// Parses a single data broker address.
fn parse_databroker_url(raw: &str) -> Result<Url, OptionsError> {
    Url::parse(raw.trim()).map_err(|source| OptionsError::InvalidDatabrokerUrl {
        url: raw.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Only fields present in the settings are overlaid.
    #[test]
    fn apply_settings_overlays_present_fields() {
        let mut options = Options::default();
        options.apply_settings(&Settings {
            log_level: Some("debug".into()),
            default_upstream_timeout_ms: Some(1500),
            ..Default::default()
        });
        assert_eq!(options.log_level, "debug");
        assert_eq!(options.default_upstream_timeout, Duration::from_millis(1500));
        assert_eq!(options.cookie_name, Options::default().cookie_name);
    }

    /// Validation drops derived policies even when it succeeds.
    #[test]
    fn validate_resets_additional_policies() {
        let mut options = Options::default();
        options
            .additional_policies
            .push(Policy::new("https://a.example.com", "http://up"));
        options.validate().unwrap();
        assert!(options.additional_policies.is_empty());
    }

    #[test]
    fn validate_reports_field_errors() {
        let mut options = Options {
            log_level: "loud".into(),
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(OptionsError::InvalidLogLevel(_))
        ));

        let mut options = Options {
            cookie_name: "bad cookie".into(),
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(OptionsError::InvalidCookieName(_))
        ));

        let mut options = Options {
            shared_key: "%%%".into(),
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(OptionsError::InvalidSharedKey)
        ));

        let mut options = Options::default();
        options.policies.push(Policy::new("https://a.example.com", "gopher://x"));
        assert!(matches!(
            options.validate(),
            Err(OptionsError::Policy { index: 0, .. })
        ));
    }

    #[test]
    fn databroker_urls_fall_back_to_default() {
        let urls = Options::default().databroker_urls().unwrap();
        assert_eq!(urls, vec![Url::parse(DEFAULT_DATABROKER_URL).unwrap()]);

        let options = Options {
            databroker_urls: vec!["::not-a-url".into()],
            ..Default::default()
        };
        assert!(matches!(
            options.databroker_urls(),
            Err(OptionsError::InvalidDatabrokerUrl { .. })
        ));
    }

    #[test]
    fn checksum_is_stable_and_content_sensitive() {
        let config = Config::default();
        assert_eq!(config.checksum(), config.clone().checksum());

        let mut changed = config.clone();
        changed.options.log_level = "warn".into();
        assert_ne!(config.checksum(), changed.checksum());
    }
}
