//! Merge of the base configuration with cached config fragments.
//!
//! Fragment settings fail closed: one invalid settings overlay aborts the
//! whole rebuild. Fragment routes fail open: a route that does not decode,
//! validate, or identify, or that collides with an earlier route, is dropped
//! and counted while the rest of the merge continues.

use std::collections::HashSet;

use thiserror::Error;
use tracing::warn;

use super::telemetry::{ConfigSourceTelemetry, FragmentInfo, FragmentRejection};
use crate::cache::FragmentCache;
use crate::options::{Config, OptionsError};
use crate::policy::{Policy, PolicyError, RouteId};

/// Reasons a rebuild ends without publishing.
#[derive(Debug, Error)]
pub enum RebuildError {
    /// A base policy has no computable route identity.
    #[error("invalid base policy {policy}: {source}")]
    BasePolicy {
        policy: String,
        #[source]
        source: PolicyError,
    },
    /// A fragment's settings made the configuration invalid.
    #[error("config {fragment_id} (version {version}) rejected: {source}")]
    FragmentRejected {
        fragment_id: String,
        version: u64,
        #[source]
        source: OptionsError,
    },
}

/// Applies every cached fragment to `config`, in ascending identifier order.
pub(crate) fn merge_fragments(
    mut config: Config,
    fragments: &FragmentCache,
    telemetry: &dyn ConfigSourceTelemetry,
) -> Result<Config, RebuildError> {
    let mut seen: HashSet<RouteId> = HashSet::new();
    for policy in config.options.all_policies() {
        let route_id = policy.route_id().map_err(|source| {
            warn!("databroker: invalid policy config {policy}, ignoring: {source}");
            RebuildError::BasePolicy {
                policy: policy.to_string(),
                source,
            }
        })?;
        seen.insert(route_id);
    }

    let mut additional_policies = Vec::new();
    for (fragment_id, cached) in fragments.iter() {
        config.options.apply_settings(&cached.fragment.settings);

        if let Err(source) = config.options.validate() {
            let services = config.options.services.clone();
            telemetry.on_fragment_info(&FragmentInfo {
                services: services.clone(),
                fragment_id: fragment_id.to_string(),
                version: cached.version,
                error_count: 0,
            });
            telemetry.on_fragment_rejected(&FragmentRejection {
                services,
                fragment_id: fragment_id.to_string(),
                version: cached.version,
                error: source.to_string(),
            });
            return Err(RebuildError::FragmentRejected {
                fragment_id: fragment_id.to_string(),
                version: cached.version,
                source,
            });
        }

        let error_count = merge_routes(
            fragment_id,
            &cached.fragment.routes,
            &mut seen,
            &mut additional_policies,
        );
        telemetry.on_fragment_info(&FragmentInfo {
            services: config.options.services.clone(),
            fragment_id: fragment_id.to_string(),
            version: cached.version,
            error_count,
        });
    }

    // Appended last: validate() resets additional_policies.
    config
        .options
        .additional_policies
        .extend(additional_policies);
    Ok(config)
}

/// Decodes a fragment's routes into `additional`, returning the number dropped.
fn merge_routes(
    fragment_id: &str,
    routes: &[serde_json::Value],
    seen: &mut HashSet<RouteId>,
    additional: &mut Vec<Policy>,
) -> u64 {
    let mut error_count = 0;
    for route in routes {
        let policy = match Policy::from_route(route) {
            Ok(policy) => policy,
            Err(err) => {
                error_count += 1;
                warn!("databroker: error converting route of config {fragment_id} into policy: {err}");
                continue;
            }
        };

        if let Err(err) = policy.validate() {
            error_count += 1;
            warn!("databroker: invalid policy {policy} in config {fragment_id}, ignoring: {err}");
            continue;
        }

        let route_id = match policy.route_id() {
            Ok(route_id) => route_id,
            Err(err) => {
                error_count += 1;
                warn!(
                    "databroker: cannot establish route id of policy {policy} in config {fragment_id}, ignoring: {err}"
                );
                continue;
            }
        };

        if !seen.insert(route_id) {
            error_count += 1;
            warn!("databroker: duplicate policy {policy} detected in config {fragment_id}, ignoring");
            continue;
        }

        additional.push(policy);
    }
    error_count
}
