//! Shared helpers for overlay integration tests.

#![allow(dead_code)]

pub mod broker;

use std::time::Duration;

use config_overlay::{Config, Options, Policy};
use serde_json::{json, Value};

/// Route present in every base configuration built by [`base_config`].
pub const BASE_ROUTE: &str = "https://app.example.com";

/// Base configuration pointing at `databroker_url`.
pub fn base_config(databroker_url: &str) -> Config {
    Config::new(Options {
        databroker_urls: vec![databroker_url.to_string()],
        policies: vec![Policy::new(BASE_ROUTE, "http://app.internal")],
        ..Default::default()
    })
}

/// Encoded fragment with the given settings and routes.
pub fn fragment(settings: Value, routes: &[&str]) -> Vec<u8> {
    let routes: Vec<Value> = routes
        .iter()
        .map(|from| json!({ "from": from, "to": ["http://upstream.internal"] }))
        .collect();
    serde_json::to_vec(&json!({ "settings": settings, "routes": routes }))
        .expect("fragment serialises")
}

/// Froms of every route in `config`, base routes first.
pub fn route_froms(config: &Config) -> Vec<String> {
    config
        .options
        .all_policies()
        .map(|policy| policy.from.clone())
        .collect()
}

/// Polls `condition` until it holds, panicking after five seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "condition not reached within 5s");
}
