//! Vhost Custom Resource Definition

use crate::crd::{RabbitmqClusterReference, TopologyStatus};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Vhost is the Schema for the vhosts API
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "rabbitmq.com",
    version = "v1beta1",
    kind = "Vhost",
    namespaced,
    status = "TopologyStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VhostSpec {
    /// Name of the vhost
    pub name: String,

    #[serde(default)]
    pub tracing: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    pub rabbitmq_cluster_reference: RabbitmqClusterReference,
}

topology_resource!(Vhost, TopologyStatus);
