//! TopicPermission Custom Resource Definition

use crate::crd::{LocalObjectReference, RabbitmqClusterReference, TopologyStatus};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// TopicPermission is the Schema for the topicpermissions API
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "rabbitmq.com",
    version = "v1beta1",
    kind = "TopicPermission",
    namespaced,
    status = "TopologyStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TopicPermissionSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_reference: Option<LocalObjectReference>,

    pub vhost: String,

    pub permissions: TopicPermissionConfig,

    pub rabbitmq_cluster_reference: RabbitmqClusterReference,
}

/// Topic permissions on one topic exchange
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TopicPermissionConfig {
    /// Name of a topic exchange
    pub exchange: String,
    #[serde(default)]
    pub write: String,
    #[serde(default)]
    pub read: String,
}

topology_resource!(TopicPermission, TopologyStatus);
