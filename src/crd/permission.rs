//! Permission Custom Resource Definition

use crate::crd::{LocalObjectReference, RabbitmqClusterReference, TopologyStatus};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Permission is the Schema for the permissions API
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "rabbitmq.com",
    version = "v1beta1",
    kind = "Permission",
    namespaced,
    status = "TopologyStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSpec {
    /// Name of an existing RabbitMQ user; exclusive with `userReference`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,

    /// User resource in the same namespace whose generated username is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_reference: Option<LocalObjectReference>,

    pub vhost: String,

    pub permissions: VhostPermissions,

    pub rabbitmq_cluster_reference: RabbitmqClusterReference,
}

/// Configure, write and read regular expressions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VhostPermissions {
    #[serde(default)]
    pub configure: String,
    #[serde(default)]
    pub write: String,
    #[serde(default)]
    pub read: String,
}

topology_resource!(Permission, TopologyStatus);
