//! Config fragments stored in the data broker.

use serde::{Deserialize, Serialize};

use crate::options::Settings;

/// One unit of dynamic configuration.
///
/// Routes stay as raw JSON until the rebuild decodes them one by one, so a
/// single malformed route never invalidates the rest of the fragment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFragment {
    /// Settings overlaid onto the base options.
    pub settings: Settings,
    /// Routes declared by the fragment.
    pub routes: Vec<serde_json::Value>,
}

impl ConfigFragment {
    /// Decodes a record payload.
    pub fn decode(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// Encodes the fragment as a record payload.
    pub fn encode(&self) -> Vec<u8> {
        // Plain structs and JSON values always serialise.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_keeps_routes_raw() {
        let fragment = ConfigFragment::decode(
            br#"{"settings":{"log_level":"debug"},"routes":[{"from":"https://a"},42]}"#,
        )
        .unwrap();
        assert_eq!(fragment.settings.log_level.as_deref(), Some("debug"));
        assert_eq!(fragment.routes, vec![json!({"from": "https://a"}), json!(42)]);
    }

    #[test]
    fn decode_rejects_non_object_payloads() {
        assert!(ConfigFragment::decode(b"not json").is_err());
        assert!(ConfigFragment::decode(b"[1,2,3]").is_err());
    }
}
