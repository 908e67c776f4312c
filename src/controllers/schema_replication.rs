//! SchemaReplication strategy
//!
//! Writes the `schema_definition_sync_upstream` global parameter. Upstream
//! credentials come from the secret store when a Vault path is configured,
//! from `upstreamSecret` otherwise.

use super::ReconcileFunc;
use crate::crd::SchemaReplication;
use crate::error::{OperatorError, Result};
use crate::rabbitmq::settings::{split_list, UpstreamEndpoints};
use crate::rabbitmq::{validate_delete_response, validate_response, Gateway, SecretStore};
use crate::store::{self, Store};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use std::sync::Arc;

/// Global parameter holding the upstream of the schema definition sync plugin.
pub const SCHEMA_REPLICATION_PARAMETER: &str = "schema_definition_sync_upstream";

pub struct SchemaReplicationReconciler {
    store: Arc<dyn Store>,
    secret_store: Option<Arc<dyn SecretStore>>,
}

/// Upstream credentials plus the endpoints listed next to them, if any.
struct UpstreamSource {
    username: Option<String>,
    password: Option<String>,
    endpoints: Option<String>,
    origin: String,
}

impl SchemaReplicationReconciler {
    pub fn new(store: Arc<dyn Store>, secret_store: Option<Arc<dyn SecretStore>>) -> Self {
        Self { store, secret_store }
    }

    async fn upstream_source(&self, replication: &SchemaReplication) -> Result<UpstreamSource> {
        if let Some(path) = replication.vault_secret_path() {
            let secret_store = self.secret_store.as_ref().ok_or_else(|| {
                OperatorError::SecretStore(
                    "unable to create a vault client connection to secret store: no secret store configured"
                        .to_string(),
                )
            })?;
            let (username, password) = secret_store.read_credentials(path).await.map_err(|e| {
                OperatorError::SecretStore(format!("unable to retrieve credentials from secret store: {e}"))
            })?;
            return Ok(UpstreamSource {
                username: Some(username),
                password: Some(password),
                endpoints: None,
                origin: path.to_string(),
            });
        }

        let reference = replication.spec.upstream_secret.as_ref().ok_or_else(|| {
            OperatorError::Configuration("no upstream secret or secretBackend provided".to_string())
        })?;
        let namespace = replication.namespace().unwrap_or_default();
        let secret = store::get::<Secret>(self.store.as_ref(), &namespace, &reference.name)
            .await?
            .ok_or_else(|| OperatorError::NotFound(format!("secret {namespace}/{}", reference.name)))?;
        Ok(UpstreamSource {
            username: store::secret_value(&secret, "username"),
            password: store::secret_value(&secret, "password"),
            endpoints: store::secret_value(&secret, "endpoints"),
            origin: reference.name.clone(),
        })
    }

    async fn upstream_endpoints(&self, replication: &SchemaReplication) -> Result<UpstreamEndpoints> {
        let source = self.upstream_source(replication).await?;
        let origin = &source.origin;
        let username = source.username.ok_or_else(|| {
            OperatorError::Reconciliation(format!("could not find username in secret {origin}"))
        })?;
        let password = source.password.ok_or_else(|| {
            OperatorError::Reconciliation(format!("could not find password in secret {origin}"))
        })?;
        let endpoints = if replication.spec.endpoints.is_empty() {
            source.endpoints.ok_or_else(|| {
                OperatorError::Reconciliation(format!(
                    "could not find endpoints in secret {origin} or from spec.endpoints"
                ))
            })?
        } else {
            replication.spec.endpoints.clone()
        };
        Ok(UpstreamEndpoints {
            username,
            password,
            endpoints: split_list(&endpoints),
        })
    }
}

#[async_trait]
impl ReconcileFunc<SchemaReplication> for SchemaReplicationReconciler {
    async fn declare(&self, gateway: &dyn Gateway, replication: &SchemaReplication) -> Result<()> {
        let upstream = self.upstream_endpoints(replication).await.map_err(|e| {
            OperatorError::Reconciliation(format!("failed to generate upstream endpoints: {e}"))
        })?;
        validate_response(
            gateway
                .put_global_parameter(SCHEMA_REPLICATION_PARAMETER, serde_json::to_value(&upstream)?)
                .await?,
        )
    }

    async fn delete(&self, gateway: &dyn Gateway, _replication: &SchemaReplication) -> Result<()> {
        validate_delete_response(gateway.delete_global_parameter(SCHEMA_REPLICATION_PARAMETER).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::testing::{secret, Harness, NAMESPACE};
    use crate::rabbitmq::testing::FakeGateway;
    use reqwest::Method;
    use serde_json::json;

    struct UpstreamVault;

    #[async_trait]
    impl SecretStore for UpstreamVault {
        async fn read_credentials(&self, path: &str) -> Result<(String, String)> {
            assert_eq!(path, "secret/data/upstream");
            Ok(("vault-user".to_string(), "vault-pass".to_string()))
        }
    }

    fn replication(spec: serde_json::Value) -> SchemaReplication {
        serde_json::from_value(json!({
            "apiVersion": "rabbitmq.com/v1beta1",
            "kind": "SchemaReplication",
            "metadata": {"name": "sync", "namespace": NAMESPACE},
            "spec": spec
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_credentials_and_endpoints_from_secret() {
        let h = Harness::new();
        h.store.insert(&secret(
            "upstream",
            &[("username", "u"), ("password", "p"), ("endpoints", "a:5672,b:5672")],
        ));
        let gateway = FakeGateway::new();
        let replication = replication(json!({
            "upstreamSecret": {"name": "upstream"},
            "rabbitmqClusterReference": {"name": "rmq"}
        }));

        SchemaReplicationReconciler::new(h.store.clone(), None)
            .declare(gateway.as_ref(), &replication)
            .await
            .unwrap();

        let call = &gateway.calls()[0];
        assert_eq!(call.path, "global-parameters/schema_definition_sync_upstream");
        assert_eq!(
            call.body,
            Some(json!({
                "name": "schema_definition_sync_upstream",
                "value": {"username": "u", "password": "p", "endpoints": ["a:5672", "b:5672"]}
            }))
        );
    }

    #[tokio::test]
    async fn test_spec_endpoints_win_and_vault_supplies_credentials() {
        let h = Harness::new();
        let gateway = FakeGateway::new();
        let replication = replication(json!({
            "endpoints": "c:5672",
            "secretBackend": {"vault": {"secretPath": "secret/data/upstream"}},
            "rabbitmqClusterReference": {"name": "rmq"}
        }));

        SchemaReplicationReconciler::new(h.store.clone(), Some(Arc::new(UpstreamVault)))
            .declare(gateway.as_ref(), &replication)
            .await
            .unwrap();

        let body = gateway.calls()[0].body.clone().unwrap();
        assert_eq!(
            body["value"],
            json!({"username": "vault-user", "password": "vault-pass", "endpoints": ["c:5672"]})
        );
    }

    #[tokio::test]
    async fn test_missing_endpoints_fails() {
        let h = Harness::new();
        h.store.insert(&secret("upstream", &[("username", "u"), ("password", "p")]));
        let replication = replication(json!({
            "upstreamSecret": {"name": "upstream"},
            "rabbitmqClusterReference": {"name": "rmq"}
        }));

        let err = SchemaReplicationReconciler::new(h.store.clone(), None)
            .declare(FakeGateway::new().as_ref(), &replication)
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("could not find endpoints in secret upstream or from spec.endpoints"));
    }

    #[tokio::test]
    async fn test_no_credentials_source_fails() {
        let h = Harness::new();
        let replication = replication(json!({"rabbitmqClusterReference": {"name": "rmq"}}));

        let err = SchemaReplicationReconciler::new(h.store.clone(), None)
            .declare(FakeGateway::new().as_ref(), &replication)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no upstream secret or secretBackend provided"));
    }

    #[tokio::test]
    async fn test_delete_removes_parameter() {
        let h = Harness::new();
        let gateway = FakeGateway::new();
        let replication = replication(json!({"rabbitmqClusterReference": {"name": "rmq"}}));
        SchemaReplicationReconciler::new(h.store.clone(), None)
            .delete(gateway.as_ref(), &replication)
            .await
            .unwrap();
        assert_eq!(
            gateway.paths(Method::DELETE),
            vec!["global-parameters/schema_definition_sync_upstream"]
        );
    }
}
