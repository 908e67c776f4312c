//! Shovel Custom Resource Definition
//!
//! Declares a dynamic shovel. `srcUri` and `destUri` are read from the
//! referenced Secret.

use crate::crd::common::default_vhost;
use crate::crd::{LocalObjectReference, RabbitmqClusterReference, TopologyStatus};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Shovel is the Schema for the shovels API
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "rabbitmq.com",
    version = "v1beta1",
    kind = "Shovel",
    namespaced,
    status = "TopologyStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ShovelSpec {
    /// Name of the shovel
    pub name: String,

    #[serde(default = "default_vhost")]
    pub vhost: String,

    pub rabbitmq_cluster_reference: RabbitmqClusterReference,

    /// Secret holding `srcUri` and `destUri`
    pub uri_secret: LocalObjectReference,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_mode: Option<String>,

    #[serde(default)]
    pub add_forward_headers: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_after: Option<String>,

    #[serde(default, rename = "destAddForwardHeaders")]
    pub dest_add_forward_headers: bool,

    #[serde(default, rename = "destAddTimestampHeader")]
    pub dest_add_timestamp_header: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_application_properties: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_exchange: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_exchange_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_properties: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_protocol: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_publish_properties: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_queue: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefetch_count: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_delay: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_delete_after: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_exchange: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_exchange_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_prefetch_count: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_protocol: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_queue: Option<String>,
}

topology_resource!(Shovel, TopologyStatus);
