//! Resolution of `rabbitmqClusterReference` into management API credentials.

use super::{ConnectionCredentials, SecretStore};
use crate::crd::{RabbitmqCluster, RabbitmqClusterReference};
use crate::error::{OperatorError, Result};
use crate::store::{self, secret_value, Store};
use k8s_openapi::api::core::v1::{Secret, Service};
use std::sync::Arc;
use tracing::debug;
use url::Url;

const PATH_PREFIX_KEY: &str = "management.path_prefix";

/// Resolves cluster references against the object store.
#[derive(Clone)]
pub struct ReferenceResolver {
    store: Arc<dyn Store>,
    secret_store: Option<Arc<dyn SecretStore>>,
    cluster_domain: String,
}

impl ReferenceResolver {
    /// `cluster_domain` is appended to service host names as is, e.g. `.cluster.local`.
    pub fn new(
        store: Arc<dyn Store>,
        secret_store: Option<Arc<dyn SecretStore>>,
        cluster_domain: impl Into<String>,
    ) -> Self {
        Self {
            store,
            secret_store,
            cluster_domain: cluster_domain.into(),
        }
    }

    /// Credentials for the referenced cluster and whether it serves TLS.
    pub async fn resolve(
        &self,
        reference: &RabbitmqClusterReference,
        request_namespace: &str,
    ) -> Result<(ConnectionCredentials, bool)> {
        if let Some(secret_ref) = &reference.connection_secret {
            let secret: Secret = store::get(self.store.as_ref(), request_namespace, &secret_ref.name)
                .await?
                .ok_or_else(|| {
                    OperatorError::NotFound(format!(
                        "connection secret {request_namespace}/{}",
                        secret_ref.name
                    ))
                })?;
            return credentials_from_connection_secret(&secret);
        }

        let (cluster, namespace) = self.cluster(reference, request_namespace).await?;
        let service_ref = cluster
            .service_reference()
            .ok_or(OperatorError::NoServiceReference)?;

        let (username, password) = match cluster.vault_default_user_path() {
            Some(path) => {
                let secret_store = self.secret_store.as_ref().ok_or_else(|| {
                    OperatorError::SecretStore(
                        "unable to create a client connection to secret store: Vault is not configured"
                            .to_string(),
                    )
                })?;
                secret_store.read_credentials(path).await.map_err(|e| {
                    OperatorError::SecretStore(format!(
                        "unable to retrieve credentials from secret store: {e}"
                    ))
                })?
            }
            None => {
                let binding = cluster
                    .status
                    .as_ref()
                    .and_then(|s| s.binding.as_ref())
                    .ok_or_else(|| OperatorError::Reconciliation("no status.binding set".to_string()))?;
                let secret: Secret = store::get(self.store.as_ref(), &namespace, &binding.name)
                    .await?
                    .ok_or_else(|| {
                        OperatorError::NotFound(format!("secret {namespace}/{}", binding.name))
                    })?;
                (
                    secret_value(&secret, "username").unwrap_or_default(),
                    secret_value(&secret, "password").unwrap_or_default(),
                )
            }
        };

        let service: Service = store::get(self.store.as_ref(), &namespace, &service_ref.name)
            .await?
            .ok_or_else(|| OperatorError::NotFound(format!("service {namespace}/{}", service_ref.name)))?;

        let tls_enabled = cluster.tls_enabled();
        let prefix = cluster
            .additional_config()
            .remove(PATH_PREFIX_KEY)
            .unwrap_or_default();
        let uri = management_uri(&service, tls_enabled, &self.cluster_domain, &prefix)?;
        debug!(cluster = %reference.name, uri = %uri, "Resolved cluster reference");

        Ok((
            ConnectionCredentials {
                uri,
                username,
                password,
            },
            tls_enabled,
        ))
    }

    /// Check the reference points at an existing, permitted cluster and pin
    /// its namespace. Connection secret references are returned unchanged.
    pub async fn qualify(
        &self,
        reference: &RabbitmqClusterReference,
        request_namespace: &str,
    ) -> Result<RabbitmqClusterReference> {
        if reference.connection_secret.is_some() {
            return Ok(reference.clone());
        }
        let (_, namespace) = self.cluster(reference, request_namespace).await?;
        Ok(RabbitmqClusterReference {
            name: reference.name.clone(),
            namespace,
            connection_secret: None,
        })
    }

    async fn cluster(
        &self,
        reference: &RabbitmqClusterReference,
        request_namespace: &str,
    ) -> Result<(RabbitmqCluster, String)> {
        let namespace = if reference.namespace.is_empty() {
            request_namespace.to_string()
        } else {
            reference.namespace.clone()
        };
        let cluster: RabbitmqCluster = store::get(self.store.as_ref(), &namespace, &reference.name)
            .await?
            .ok_or_else(|| OperatorError::ClusterNotFound(format!("{namespace}/{}", reference.name)))?;
        if !cluster.allows(reference, request_namespace) {
            return Err(OperatorError::NotAllowed);
        }
        Ok((cluster, namespace))
    }
}

fn credentials_from_connection_secret(secret: &Secret) -> Result<(ConnectionCredentials, bool)> {
    let mut uri = secret_value(secret, "uri").ok_or_else(|| {
        OperatorError::Configuration(
            "failed to retrieve uri: key uri missing from credentials".to_string(),
        )
    })?;
    if !uri.starts_with("http") {
        uri = format!("http://{uri}");
    }
    let tls_enabled = Url::parse(&uri)?.scheme() == "https";
    Ok((
        ConnectionCredentials {
            uri,
            username: secret_value(secret, "username").unwrap_or_default(),
            password: secret_value(secret, "password").unwrap_or_default(),
        },
        tls_enabled,
    ))
}

/// Management endpoint of the cluster service; `management-tls` wins over `management`.
fn management_uri(
    service: &Service,
    tls_enabled: bool,
    cluster_domain: &str,
    path_prefix: &str,
) -> Result<String> {
    let ports = service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .map(Vec::as_slice)
        .unwrap_or_default();
    let named = |name: &str| {
        ports
            .iter()
            .find(|p| p.name.as_deref() == Some(name))
            .map(|p| p.port)
    };
    let service_name = service.metadata.name.clone().unwrap_or_default();
    let port = named("management-tls")
        .or_else(|| named("management"))
        .ok_or_else(|| {
            OperatorError::Configuration(format!(
                "failed to find 'management' or 'management-tls' from service {service_name}"
            ))
        })?;

    let scheme = if tls_enabled { "https" } else { "http" };
    let namespace = service.metadata.namespace.clone().unwrap_or_default();
    let mut prefix = path_prefix.to_string();
    if !prefix.is_empty() && !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    Ok(format!(
        "{scheme}://{service_name}.{namespace}.svc{cluster_domain}:{port}{prefix}"
    ))
}
