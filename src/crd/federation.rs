//! Federation Custom Resource Definition
//!
//! Declares a federation upstream. Upstream URIs come from the `uri` key of
//! the referenced Secret and may hold several comma separated values.

use crate::crd::common::default_vhost;
use crate::crd::{LocalObjectReference, RabbitmqClusterReference, TopologyStatus};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Federation is the Schema for the federations API
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "rabbitmq.com",
    version = "v1beta1",
    kind = "Federation",
    namespaced,
    status = "TopologyStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FederationSpec {
    /// Name of the federation upstream
    pub name: String,

    #[serde(default = "default_vhost")]
    pub vhost: String,

    pub rabbitmq_cluster_reference: RabbitmqClusterReference,

    /// Secret holding the upstream `uri`
    pub uri_secret: LocalObjectReference,

    #[serde(default, rename = "prefetch-count", skip_serializing_if = "Option::is_none")]
    pub prefetch_count: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_mode: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,

    #[serde(default, rename = "messageTTL", skip_serializing_if = "Option::is_none")]
    pub message_ttl: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_hops: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_delay: Option<i64>,

    #[serde(default)]
    pub trust_user_id: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
}

topology_resource!(Federation, TopologyStatus);
