//! Policy Custom Resource Definition

use crate::crd::common::default_vhost;
use crate::crd::{RabbitmqClusterReference, TopologyStatus};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Policy is the Schema for the policies API
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "rabbitmq.com",
    version = "v1beta1",
    kind = "Policy",
    plural = "policies",
    namespaced,
    status = "TopologyStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    /// Name of the policy
    pub name: String,

    #[serde(default = "default_vhost")]
    pub vhost: String,

    /// Regular expression matched against queue and exchange names
    pub pattern: String,

    /// `queues`, `exchanges` or `all`
    #[serde(default = "default_apply_to")]
    pub apply_to: String,

    #[serde(default)]
    pub priority: i32,

    /// Policy definition
    pub definition: serde_json::Value,

    pub rabbitmq_cluster_reference: RabbitmqClusterReference,
}

fn default_apply_to() -> String {
    "all".to_string()
}

topology_resource!(Policy, TopologyStatus);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_spec_parsing() {
        let json = r#"{
            "name": "ha",
            "pattern": "^lazy-",
            "definition": {"queue-mode": "lazy"},
            "rabbitmqClusterReference": {"name": "rmq"}
        }"#;
        let spec: PolicySpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.apply_to, "all");
        assert_eq!(spec.priority, 0);
        assert_eq!(spec.definition["queue-mode"], "lazy");
    }
}
