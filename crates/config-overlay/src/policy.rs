//! Route policies served by the access proxy.
//!
//! A [`Policy`] maps an inbound route (`from` plus an optional path matcher)
//! to one or more upstreams. Policies come either from the statically loaded
//! base configuration or from config fragments synchronised from the data
//! broker. Both sources are deduplicated through [`Policy::route_id`].

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

/// Stable identity of the inbound route described by a policy.
pub type RouteId = u64;

/// Schemes accepted for both `from` and `to` URLs.
const ALLOWED_SCHEMES: [&str; 2] = ["http", "https"];

/// Errors raised while decoding, validating, or identifying a policy.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The raw route could not be decoded into a policy.
    #[error("failed to decode route: {0}")]
    Decode(#[from] serde_json::Error),
    /// The `from` URL is missing or malformed.
    #[error("invalid from url {url:?}: {reason}")]
    InvalidFrom { url: String, reason: String },
    /// One of the `to` URLs is malformed.
    #[error("invalid to url {url:?}: {reason}")]
    InvalidTo { url: String, reason: String },
    /// The policy has no upstream.
    #[error("policy must declare at least one `to` url")]
    MissingTo,
    /// More than one of prefix, path, and regex is set.
    #[error("only one of prefix, path, or regex may be set")]
    ConflictingMatchers,
    /// A prefix or path matcher does not start with `/`.
    #[error("{field} must start with '/': {value:?}")]
    RelativeMatcher { field: &'static str, value: String },
    /// The regex matcher does not compile.
    #[error("invalid regex {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    /// An allowed domain entry is blank.
    #[error("allowed domains must not contain empty entries")]
    EmptyAllowedDomain,
}

/// A single proxied route and its access rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Externally visible URL the route answers on.
    pub from: String,
    /// Upstream URLs traffic is forwarded to.
    #[serde(default)]
    pub to: Vec<String>,
    /// Optional path-prefix matcher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Optional exact-path matcher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Optional regular-expression path matcher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    /// Skips authentication entirely for the route.
    #[serde(default)]
    pub allow_public_unauthenticated_access: bool,
    /// Users allowed to access the route.
    #[serde(default)]
    pub allowed_users: Vec<String>,
    /// Email domains allowed to access the route.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    /// Forwards the original `Host` header upstream.
    #[serde(default)]
    pub preserve_host_header: bool,
    /// Per-route upstream timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Policy {
    /// Creates a policy routing `from` to a single upstream.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: vec![to.into()],
            prefix: None,
            path: None,
            regex: None,
            allow_public_unauthenticated_access: false,
            allowed_users: Vec::new(),
            allowed_domains: Vec::new(),
            preserve_host_header: false,
            timeout_ms: None,
        }
    }

    /// Decodes a raw route declared by a config fragment.
    pub fn from_route(route: &serde_json::Value) -> Result<Self, PolicyError> {
        Ok(Policy::deserialize(route)?)
    }

    /// Checks the policy for structural errors.
    pub fn validate(&self) -> Result<(), PolicyError> {
        parse_route_url(&self.from).map_err(|reason| PolicyError::InvalidFrom {
            url: self.from.clone(),
            reason,
        })?;

        if self.to.is_empty() {
            return Err(PolicyError::MissingTo);
        }
        for to in &self.to {
            parse_route_url(to).map_err(|reason| PolicyError::InvalidTo {
                url: to.clone(),
                reason,
            })?;
        }

        let matchers = [&self.prefix, &self.path, &self.regex]
            .iter()
            .filter(|m| m.is_some())
            .count();
        if matchers > 1 {
            return Err(PolicyError::ConflictingMatchers);
        }
        for (field, value) in [("prefix", &self.prefix), ("path", &self.path)] {
            if let Some(value) = value {
                if !value.starts_with('/') {
                    return Err(PolicyError::RelativeMatcher {
                        field,
                        value: value.clone(),
                    });
                }
            }
        }
        if let Some(pattern) = &self.regex {
            Regex::new(pattern).map_err(|source| PolicyError::InvalidRegex {
                pattern: pattern.clone(),
                source,
            })?;
        }

        if self.allowed_domains.iter().any(|d| d.trim().is_empty()) {
            return Err(PolicyError::EmptyAllowedDomain);
        }
        Ok(())
    }

    /// Computes the identity of the inbound route.
    ///
    /// Only the normalised `from` origin and the path matcher contribute, so
    /// two policies answering the same requests collide regardless of their
    /// upstreams or access rules.
    pub fn route_id(&self) -> Result<RouteId, PolicyError> {
        let from = Url::parse(&self.from).map_err(|err| PolicyError::InvalidFrom {
            url: self.from.clone(),
            reason: err.to_string(),
        })?;

        let mut hasher = Sha256::new();
        hash_field(&mut hasher, from.scheme());
        hash_field(&mut hasher, from.host_str().unwrap_or_default());
        hash_field(
            &mut hasher,
            &from
                .port_or_known_default()
                .map(|p| p.to_string())
                .unwrap_or_default(),
        );
        for matcher in [&self.prefix, &self.path, &self.regex] {
            hash_field(&mut hasher, matcher.as_deref().unwrap_or_default());
        }
        let digest = hasher.finalize();

        let mut id = [0u8; 8];
        id.copy_from_slice(&digest[..8]);
        Ok(RouteId::from_be_bytes(id))
    }
}

impl fmt::Display for Policy {
    /// Renders the policy as `from[matcher] -> to` for log lines.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.from)?;
        if let Some(prefix) = &self.prefix {
            write!(f, " prefix={prefix}")?;
        } else if let Some(path) = &self.path {
            write!(f, " path={path}")?;
        } else if let Some(regex) = &self.regex {
            write!(f, " regex={regex}")?;
        }
        write!(f, " -> {}", self.to.join(","))
    }
}

/// Feeds a length-prefixed field into the hasher so adjacent fields cannot alias.
fn hash_field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

/// Parses a route URL and enforces scheme and host requirements.
fn parse_route_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|err| err.to_string())?;
    if !ALLOWED_SCHEMES.contains(&url.scheme()) {
        return Err(format!("unsupported scheme {:?}", url.scheme()));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err("missing host".into());
    }
    Ok(url)
}
