//! Exchange Custom Resource Definition

use crate::crd::common::default_vhost;
use crate::crd::{RabbitmqClusterReference, TopologyStatus};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Exchange is the Schema for the exchanges API
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "rabbitmq.com",
    version = "v1beta1",
    kind = "Exchange",
    namespaced,
    status = "TopologyStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeSpec {
    /// Name of the exchange
    pub name: String,

    #[serde(default = "default_vhost")]
    pub vhost: String,

    /// Exchange type, `direct` unless set
    #[serde(default = "default_exchange_type")]
    pub r#type: String,

    #[serde(default)]
    pub durable: bool,

    #[serde(default)]
    pub auto_delete: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,

    pub rabbitmq_cluster_reference: RabbitmqClusterReference,
}

impl Default for ExchangeSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            vhost: default_vhost(),
            r#type: default_exchange_type(),
            durable: false,
            auto_delete: false,
            arguments: None,
            rabbitmq_cluster_reference: RabbitmqClusterReference::default(),
        }
    }
}

fn default_exchange_type() -> String {
    "direct".to_string()
}

topology_resource!(Exchange, TopologyStatus);
