//! RabbitmqCluster Custom Resource Definition
//!
//! The cluster resource is owned by the RabbitMQ cluster operator. This view
//! carries only what reference resolution reads: TLS, the secret backend,
//! free-form broker configuration and the published service and credentials.

use crate::crd::{LocalObjectReference, RabbitmqClusterReference};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Annotation listing namespaces allowed to reference a cluster from elsewhere.
pub const ALLOWED_NAMESPACES_ANNOTATION: &str = "rabbitmq.com/topology-allowed-namespaces";

/// RabbitmqCluster as seen by the topology operator
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "rabbitmq.com",
    version = "v1beta1",
    kind = "RabbitmqCluster",
    namespaced,
    status = "RabbitmqClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct RabbitmqClusterSpec {
    #[serde(default)]
    pub tls: ClusterTls,

    #[serde(default)]
    pub secret_backend: SecretBackend,

    #[serde(default)]
    pub rabbitmq: RabbitmqConfig,
}

/// TLS settings of the cluster
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTls {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
}

/// External secret backend
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretBackend {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault: Option<VaultSpec>,
}

/// Vault backend settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VaultSpec {
    /// Path of the default user credentials in Vault
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_user_path: Option<String>,
}

/// Broker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RabbitmqConfig {
    /// Free-form `key = value` lines appended to rabbitmq.conf
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_config: Option<String>,
}

/// Observed state published by the cluster operator
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RabbitmqClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_user: Option<DefaultUserStatus>,

    /// Secret holding the default user credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<LocalObjectReference>,
}

/// Default user references
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DefaultUserStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_reference: Option<ServiceReference>,
}

/// Reference to the client Service
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ServiceReference {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

impl RabbitmqCluster {
    /// Whether the management endpoint is served over TLS.
    pub fn tls_enabled(&self) -> bool {
        self.spec
            .tls
            .secret_name
            .as_deref()
            .is_some_and(|s| !s.is_empty())
    }

    /// Vault path of the default user credentials, when Vault is the backend.
    pub fn vault_default_user_path(&self) -> Option<&str> {
        self.spec
            .secret_backend
            .vault
            .as_ref()
            .and_then(|v| v.default_user_path.as_deref())
            .filter(|p| !p.is_empty())
    }

    /// Name of the management Service, if the cluster has published one.
    pub fn service_reference(&self) -> Option<&ServiceReference> {
        self.status
            .as_ref()
            .and_then(|s| s.default_user.as_ref())
            .and_then(|d| d.service_reference.as_ref())
    }

    /// Keys of the default section of `additionalConfig`.
    pub fn additional_config(&self) -> BTreeMap<String, String> {
        self.spec
            .rabbitmq
            .additional_config
            .as_deref()
            .map(parse_default_section)
            .unwrap_or_default()
    }

    /// Whether a resource in `request_namespace` may use this cluster through `reference`.
    ///
    /// Same-namespace references are always allowed. Anything else needs the
    /// requester's namespace, or `*`, in the allow-list annotation.
    pub fn allows(&self, reference: &RabbitmqClusterReference, request_namespace: &str) -> bool {
        if reference.namespace.is_empty() || reference.namespace == request_namespace {
            return true;
        }
        self.annotations()
            .get(ALLOWED_NAMESPACES_ANNOTATION)
            .is_some_and(|allowed| {
                allowed
                    .split(',')
                    .any(|ns| ns == request_namespace || ns == "*")
            })
    }
}

/// Parse `key = value` lines up to the first `[section]` header.
fn parse_default_section(text: &str) -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') {
            break;
        }
        if let Some((key, value)) = line.split_once('=') {
            values.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn cluster_with_annotation(value: Option<&str>) -> RabbitmqCluster {
        let mut cluster = RabbitmqCluster::new("rmq", RabbitmqClusterSpec::default());
        cluster.metadata.namespace = Some("rabbitmq-system".to_string());
        if let Some(v) = value {
            cluster.metadata.annotations = Some(BTreeMap::from([(
                ALLOWED_NAMESPACES_ANNOTATION.to_string(),
                v.to_string(),
            )]));
        }
        cluster
    }

    fn reference(namespace: &str) -> RabbitmqClusterReference {
        RabbitmqClusterReference {
            name: "rmq".to_string(),
            namespace: namespace.to_string(),
            connection_secret: None,
        }
    }

    #[test]
    fn test_same_namespace_always_allowed() {
        let cluster = cluster_with_annotation(None);
        assert!(cluster.allows(&reference(""), "team-a"));
        assert!(cluster.allows(&reference("team-a"), "team-a"));
    }

    #[test]
    fn test_cross_namespace_needs_allow_list() {
        let cluster = cluster_with_annotation(None);
        assert!(!cluster.allows(&reference("rabbitmq-system"), "team-a"));

        let cluster = cluster_with_annotation(Some("team-b,team-a"));
        assert!(cluster.allows(&reference("rabbitmq-system"), "team-a"));
        assert!(!cluster.allows(&reference("rabbitmq-system"), "team-c"));
    }

    #[test]
    fn test_wildcard_allows_everyone() {
        let cluster = cluster_with_annotation(Some("*"));
        assert!(cluster.allows(&reference("rabbitmq-system"), "anything"));
    }

    #[test]
    fn test_additional_config_default_section() {
        let mut cluster = cluster_with_annotation(None);
        cluster.spec.rabbitmq.additional_config = Some(
            "# comment\nmanagement.path_prefix = /my/prefix\nlog.level=debug\n[other]\nignored = true\n"
                .to_string(),
        );
        let config = cluster.additional_config();
        assert_eq!(
            config.get("management.path_prefix").map(String::as_str),
            Some("/my/prefix")
        );
        assert_eq!(config.get("log.level").map(String::as_str), Some("debug"));
        assert!(!config.contains_key("ignored"));
    }

    #[test]
    fn test_status_parsing() {
        let json = r#"{
            "defaultUser": {"serviceReference": {"name": "rmq", "namespace": "ns"}},
            "binding": {"name": "rmq-default-user"}
        }"#;
        let status: RabbitmqClusterStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status.binding.unwrap().name, "rmq-default-user");
        assert_eq!(
            status.default_user.unwrap().service_reference.unwrap().name,
            "rmq"
        );
    }
}
