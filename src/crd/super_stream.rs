//! SuperStream Custom Resource Definition
//!
//! A super stream expands into one exchange, and one stream queue plus one
//! binding per partition. The partition count may grow but never shrink.

use crate::crd::common::default_vhost;
use crate::crd::{Condition, RabbitmqClusterReference};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// SuperStream is the Schema for the superstreams API
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "rabbitmq.com",
    version = "v1alpha1",
    kind = "SuperStream",
    namespaced,
    status = "SuperStreamStatus",
    printcolumn = r#"{"name":"Partitions","type":"integer","jsonPath":".spec.partitions"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SuperStreamSpec {
    /// Name of the super stream
    pub name: String,

    #[serde(default = "default_vhost")]
    pub vhost: String,

    /// Number of partitions, 3 unless set
    #[serde(default = "default_partitions")]
    #[schemars(range(min = 1))]
    pub partitions: usize,

    /// Routing key of each partition; partition indexes are used when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routing_keys: Vec<String>,

    pub rabbitmq_cluster_reference: RabbitmqClusterReference,
}

/// Status of a SuperStream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SuperStreamStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Names of the realized partition queues, in routing key order
    #[serde(default)]
    pub partitions: Vec<String>,
}

fn default_partitions() -> usize {
    3
}

impl SuperStream {
    /// Number of partitions realized by a previous pass.
    pub fn realized_partitions(&self) -> usize {
        self.status.as_ref().map_or(0, |s| s.partitions.len())
    }
}

topology_resource!(SuperStream, SuperStreamStatus);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_super_stream_defaults() {
        let json = r#"{"name": "invoices", "rabbitmqClusterReference": {"name": "rmq"}}"#;
        let spec: SuperStreamSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.partitions, 3);
        assert_eq!(spec.vhost, "/");
        assert!(spec.routing_keys.is_empty());

        let stream = SuperStream::new("invoices", spec);
        assert_eq!(stream.realized_partitions(), 0);
    }

    #[test]
    fn test_schema_requires_a_partition() {
        let schema = serde_json::to_value(schemars::schema_for!(SuperStreamSpec)).unwrap();
        assert_eq!(schema["properties"]["partitions"]["minimum"], serde_json::json!(1.0));
    }
}
