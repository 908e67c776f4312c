//! Access to RabbitMQ clusters
//!
//! - [`Gateway`]: declare and delete calls against the management API
//! - [`ManagementClient`]: HTTP implementation of the gateway
//! - [`ReferenceResolver`]: turns a cluster reference into credentials
//! - [`SecretStore`]: external credential backend (Vault)

mod client;
mod reference;
pub mod settings;
mod vault;

pub use client::{ManagementClient, ManagementClientFactory};
pub use reference::ReferenceResolver;
pub use vault::{parse_credentials, SecretStore, VaultClient, VaultConfig};

use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use settings::{
    BindingInfo, ExchangeSettings, FederationDefinition, Permissions, PolicyDefinition,
    QueueSettings, ShovelDefinition, TopicPermissions, UserSettings, VhostSettings,
};
use std::sync::Arc;

/// Status and body of a management API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

/// Management endpoint and the credentials to use against it.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionCredentials {
    pub uri: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ConnectionCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCredentials")
            .field("uri", &self.uri)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Fail on any status of 300 and above.
pub fn validate_response(response: Response) -> Result<()> {
    if response.status >= 300 {
        return Err(OperatorError::Remote {
            status: response.status,
            body: response.body,
        });
    }
    Ok(())
}

/// Like [`validate_response`], with 404 reported as [`OperatorError::RemoteNotFound`].
pub fn validate_delete_response(response: Response) -> Result<()> {
    if response.status == 404 {
        return Err(OperatorError::RemoteNotFound);
    }
    validate_response(response)
}

fn body<T: Serialize>(value: &T) -> Result<Option<Value>> {
    Ok(Some(serde_json::to_value(value)?))
}

fn destination_segment(destination_type: &str) -> &'static str {
    if destination_type == "exchange" {
        "e"
    } else {
        "q"
    }
}

/// Declare and delete operations against one cluster's management API.
///
/// Implementors provide [`Gateway::request`]; the per-kind operations map
/// onto management API paths. Path segments are sent percent-encoded.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn request(&self, method: Method, path: &[&str], body: Option<Value>) -> Result<Response>;

    async fn put_vhost(&self, name: &str, settings: &VhostSettings) -> Result<Response> {
        self.request(Method::PUT, &["vhosts", name], body(settings)?).await
    }

    async fn delete_vhost(&self, name: &str) -> Result<Response> {
        self.request(Method::DELETE, &["vhosts", name], None).await
    }

    async fn declare_queue(&self, vhost: &str, name: &str, settings: &QueueSettings) -> Result<Response> {
        self.request(Method::PUT, &["queues", vhost, name], body(settings)?)
            .await
    }

    async fn delete_queue(&self, vhost: &str, name: &str) -> Result<Response> {
        self.request(Method::DELETE, &["queues", vhost, name], None).await
    }

    async fn declare_exchange(
        &self,
        vhost: &str,
        name: &str,
        settings: &ExchangeSettings,
    ) -> Result<Response> {
        self.request(Method::PUT, &["exchanges", vhost, name], body(settings)?)
            .await
    }

    async fn delete_exchange(&self, vhost: &str, name: &str) -> Result<Response> {
        self.request(Method::DELETE, &["exchanges", vhost, name], None)
            .await
    }

    async fn declare_binding(&self, vhost: &str, info: &BindingInfo) -> Result<Response> {
        let payload = serde_json::json!({
            "routing_key": info.routing_key,
            "arguments": info.arguments,
        });
        let dest = destination_segment(&info.destination_type);
        self.request(
            Method::POST,
            &["bindings", vhost, "e", &info.source, dest, &info.destination],
            Some(payload),
        )
        .await
    }

    async fn delete_binding(&self, vhost: &str, info: &BindingInfo) -> Result<Response> {
        let dest = destination_segment(&info.destination_type);
        self.request(
            Method::DELETE,
            &[
                "bindings",
                vhost,
                "e",
                &info.source,
                dest,
                &info.destination,
                &info.properties_key,
            ],
            None,
        )
        .await
    }

    /// Bindings from exchange `source` to `destination`.
    async fn list_bindings_between(
        &self,
        vhost: &str,
        source: &str,
        destination: &str,
        destination_type: &str,
    ) -> Result<Vec<BindingInfo>> {
        let dest = destination_segment(destination_type);
        let response = self
            .request(
                Method::GET,
                &["bindings", vhost, "e", source, dest, destination],
                None,
            )
            .await?;
        let text = response.body.clone();
        validate_response(response)?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn put_user(&self, name: &str, settings: &UserSettings) -> Result<Response> {
        self.request(Method::PUT, &["users", name], body(settings)?).await
    }

    async fn delete_user(&self, name: &str) -> Result<Response> {
        self.request(Method::DELETE, &["users", name], None).await
    }

    async fn update_permissions_in(
        &self,
        vhost: &str,
        user: &str,
        permissions: &Permissions,
    ) -> Result<Response> {
        self.request(Method::PUT, &["permissions", vhost, user], body(permissions)?)
            .await
    }

    async fn clear_permissions_in(&self, vhost: &str, user: &str) -> Result<Response> {
        self.request(Method::DELETE, &["permissions", vhost, user], None)
            .await
    }

    async fn update_topic_permissions_in(
        &self,
        vhost: &str,
        user: &str,
        permissions: &TopicPermissions,
    ) -> Result<Response> {
        self.request(
            Method::PUT,
            &["topic-permissions", vhost, user],
            body(permissions)?,
        )
        .await
    }

    async fn delete_topic_permissions_in(
        &self,
        vhost: &str,
        user: &str,
        exchange: &str,
    ) -> Result<Response> {
        self.request(
            Method::DELETE,
            &["topic-permissions", vhost, user],
            Some(serde_json::json!({ "exchange": exchange })),
        )
        .await
    }

    async fn put_policy(&self, vhost: &str, name: &str, policy: &PolicyDefinition) -> Result<Response> {
        self.request(Method::PUT, &["policies", vhost, name], body(policy)?)
            .await
    }

    async fn delete_policy(&self, vhost: &str, name: &str) -> Result<Response> {
        self.request(Method::DELETE, &["policies", vhost, name], None)
            .await
    }

    async fn put_federation_upstream(
        &self,
        vhost: &str,
        name: &str,
        definition: &FederationDefinition,
    ) -> Result<Response> {
        self.request(
            Method::PUT,
            &["parameters", "federation-upstream", vhost, name],
            Some(serde_json::json!({ "value": definition })),
        )
        .await
    }

    async fn delete_federation_upstream(&self, vhost: &str, name: &str) -> Result<Response> {
        self.request(
            Method::DELETE,
            &["parameters", "federation-upstream", vhost, name],
            None,
        )
        .await
    }

    async fn declare_shovel(
        &self,
        vhost: &str,
        name: &str,
        definition: &ShovelDefinition,
    ) -> Result<Response> {
        self.request(
            Method::PUT,
            &["parameters", "shovel", vhost, name],
            Some(serde_json::json!({ "value": definition })),
        )
        .await
    }

    async fn delete_shovel(&self, vhost: &str, name: &str) -> Result<Response> {
        self.request(Method::DELETE, &["parameters", "shovel", vhost, name], None)
            .await
    }

    async fn put_global_parameter(&self, name: &str, value: Value) -> Result<Response> {
        self.request(
            Method::PUT,
            &["global-parameters", name],
            Some(serde_json::json!({ "name": name, "value": value })),
        )
        .await
    }

    async fn delete_global_parameter(&self, name: &str) -> Result<Response> {
        self.request(Method::DELETE, &["global-parameters", name], None)
            .await
    }
}

/// Builds a [`Gateway`] for resolved credentials.
pub trait GatewayFactory: Send + Sync {
    fn build(&self, credentials: &ConnectionCredentials, tls_enabled: bool) -> Result<Arc<dyn Gateway>>;
}


#[cfg(test)]
mod tests {
    use super::testing::FakeGateway;
    use super::*;

    #[test]
    fn test_validate_response() {
        assert!(validate_response(Response { status: 204, body: String::new() }).is_ok());
        let err = validate_response(Response {
            status: 400,
            body: "bad".to_string(),
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "request failed with status code 400 and body bad");
    }

    #[test]
    fn test_validate_delete_response_maps_404() {
        let err = validate_delete_response(Response {
            status: 404,
            body: String::new(),
        })
        .unwrap_err();
        assert!(matches!(err, OperatorError::RemoteNotFound));
        assert!(matches!(
            validate_delete_response(Response { status: 500, body: String::new() }),
            Err(OperatorError::Remote { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_binding_paths_use_destination_type() {
        let gateway = FakeGateway::new();
        let info = BindingInfo {
            source: "events".to_string(),
            destination: "audit".to_string(),
            destination_type: "exchange".to_string(),
            routing_key: "a".to_string(),
            ..Default::default()
        };
        gateway.declare_binding("/", &info).await.unwrap();
        assert_eq!(gateway.paths(Method::POST), vec!["bindings///e/events/e/audit"]);
    }

    #[tokio::test]
    async fn test_list_bindings_parses_body() {
        let gateway = FakeGateway::new();
        gateway.list_returns(serde_json::json!([
            {"source": "ex", "destination": "q", "destination_type": "queue",
             "routing_key": "k", "arguments": {}, "properties_key": "k"}
        ]));
        let listed = gateway.list_bindings_between("/", "ex", "q", "queue").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].properties_key, "k");
    }
}
