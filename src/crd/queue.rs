//! Queue Custom Resource Definition

use crate::crd::common::default_vhost;
use crate::crd::{RabbitmqClusterReference, TopologyStatus};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Queue is the Schema for the queues API
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "rabbitmq.com",
    version = "v1beta1",
    kind = "Queue",
    namespaced,
    status = "TopologyStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct QueueSpec {
    /// Name of the queue
    pub name: String,

    /// Defaults to `/`
    #[serde(default = "default_vhost")]
    pub vhost: String,

    /// Queue type (classic, quorum, stream)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,

    #[serde(default)]
    pub durable: bool,

    #[serde(default)]
    pub auto_delete: bool,

    /// Queue arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,

    pub rabbitmq_cluster_reference: RabbitmqClusterReference,
}

topology_resource!(Queue, TopologyStatus);
