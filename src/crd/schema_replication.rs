//! SchemaReplication Custom Resource Definition
//!
//! Configures the schema definition sync upstream of a cluster. Upstream
//! credentials come from Vault or a Secret; endpoints from `spec.endpoints` or the
//! same Secret.

use crate::crd::{LocalObjectReference, RabbitmqClusterReference, TopologyStatus};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// SchemaReplication is the Schema for the schemareplications API
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "rabbitmq.com",
    version = "v1beta1",
    kind = "SchemaReplication",
    namespaced,
    status = "TopologyStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SchemaReplicationSpec {
    pub rabbitmq_cluster_reference: RabbitmqClusterReference,

    /// Secret with `username`, `password` and optionally `endpoints`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_secret: Option<LocalObjectReference>,

    /// Comma separated upstream endpoints
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoints: String,

    #[serde(default)]
    pub secret_backend: SchemaReplicationSecretBackend,
}

/// Secret backend for upstream credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SchemaReplicationSecretBackend {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault: Option<SchemaReplicationVaultSpec>,
}

/// Vault path of the upstream credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchemaReplicationVaultSpec {
    #[serde(default)]
    pub secret_path: String,
}

impl SchemaReplication {
    /// Vault path of the upstream credentials, if Vault is used.
    pub fn vault_secret_path(&self) -> Option<&str> {
        self.spec
            .secret_backend
            .vault
            .as_ref()
            .map(|v| v.secret_path.as_str())
            .filter(|p| !p.is_empty())
    }
}

topology_resource!(SchemaReplication, TopologyStatus);
