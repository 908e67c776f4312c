//! Binding Custom Resource Definition

use crate::crd::common::default_vhost;
use crate::crd::{RabbitmqClusterReference, TopologyStatus};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Binding is the Schema for the bindings API
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "rabbitmq.com",
    version = "v1beta1",
    kind = "Binding",
    namespaced,
    status = "TopologyStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BindingSpec {
    #[serde(default = "default_vhost")]
    pub vhost: String,

    /// Source exchange
    #[serde(default)]
    pub source: String,

    /// Destination queue or exchange
    #[serde(default)]
    pub destination: String,

    /// `queue` or `exchange`
    #[serde(default)]
    pub destination_type: String,

    #[serde(default)]
    pub routing_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,

    pub rabbitmq_cluster_reference: RabbitmqClusterReference,
}

impl Default for BindingSpec {
    fn default() -> Self {
        Self {
            vhost: default_vhost(),
            source: String::new(),
            destination: String::new(),
            destination_type: String::new(),
            routing_key: String::new(),
            arguments: None,
            rabbitmq_cluster_reference: RabbitmqClusterReference::default(),
        }
    }
}

topology_resource!(Binding, TopologyStatus);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_spec_parsing() {
        let json = r#"{
            "source": "events",
            "destination": "audit",
            "destinationType": "queue",
            "routingKey": "a.b",
            "arguments": {"x-match": "any"},
            "rabbitmqClusterReference": {"connectionSecret": {"name": "conn"}}
        }"#;
        let spec: BindingSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.vhost, "/");
        assert_eq!(spec.destination_type, "queue");
        assert_eq!(spec.arguments.unwrap()["x-match"], "any");
        assert_eq!(
            spec.rabbitmq_cluster_reference.connection_secret.unwrap().name,
            "conn"
        );
    }
}
