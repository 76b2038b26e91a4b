//! An HTTP front end for draining, cordoning and uncordoning Kubernetes Nodes.
pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

pub(crate) mod constants;

use drain::DrainPolicy;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
/// Describes a Node which should be cordoned and have its Pods removed.
pub struct DrainNodeRequest {
    #[validate(length(min = 1, max = 253))]
    pub node_name: String,
    #[serde(default)]
    #[validate]
    pub policy: DrainPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
/// Describes a Node which should be cordoned or uncordoned.
pub struct NodeRequest {
    #[validate(length(min = 1, max = 253))]
    pub node_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_request_defaults_policy() {
        let request: DrainNodeRequest = serde_json::from_str(r#"{"nodeName": "node-1"}"#).unwrap();
        assert_eq!(request.policy, DrainPolicy::default());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_nested_policy_is_validated() {
        let request: DrainNodeRequest = serde_json::from_str(
            r#"{"nodeName": "node-1", "policy": {"podSelector": ""}}"#,
        )
        .unwrap();
        assert!(request.validate().is_err());

        let request = NodeRequest {
            node_name: String::new(),
        };
        assert!(request.validate().is_err());
    }
}
