//! Types shared by every topology custom resource.

use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Reference to a Secret in the same namespace as the referencing resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LocalObjectReference {
    pub name: String,
}

impl LocalObjectReference {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Pointer to the RabbitMQ cluster a resource is declared against.
///
/// Either `name` (and optionally `namespace`) or `connectionSecret` is set,
/// never both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RabbitmqClusterReference {
    /// Name of the RabbitmqCluster
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Namespace of the RabbitmqCluster; defaults to the namespace of the
    /// referencing resource
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Secret holding `uri`, `username` and `password` of a management endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_secret: Option<LocalObjectReference>,
}

/// Status condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (always `Ready` for topology resources)
    pub r#type: String,

    /// True or False
    pub status: String,

    /// Last time the status value changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,

    /// One word, camel-case reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Status shared by resources without derived fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopologyStatus {
    /// Most recent generation successfully declared
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Capabilities the generic reconciler needs from a declared resource.
pub trait TopologyResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    fn cluster_reference(&self) -> &RabbitmqClusterReference;

    fn status_conditions(&self) -> &[Condition];

    fn set_status_conditions(&mut self, conditions: Vec<Condition>);

    fn set_observed_generation(&mut self, generation: i64);
}

pub(crate) fn default_vhost() -> String {
    "/".to_string()
}
