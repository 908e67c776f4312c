//! Binding strategy
//!
//! Bindings have no name on the broker. Deletion addresses them by their
//! properties key, derived from the routing key when the binding has no
//! arguments, or looked up by listing bindings between source and
//! destination otherwise.

use super::ReconcileFunc;
use crate::crd::Binding;
use crate::error::{OperatorError, Result};
use crate::rabbitmq::settings::{arguments_map, BindingInfo};
use crate::rabbitmq::{validate_delete_response, validate_response, Gateway};
use async_trait::async_trait;
use tracing::info;

pub struct BindingReconciler;

fn binding_info(binding: &Binding) -> BindingInfo {
    BindingInfo {
        source: binding.spec.source.clone(),
        vhost: binding.spec.vhost.clone(),
        destination: binding.spec.destination.clone(),
        destination_type: binding.spec.destination_type.clone(),
        routing_key: binding.spec.routing_key.clone(),
        arguments: arguments_map(binding.spec.arguments.as_ref()),
        properties_key: String::new(),
    }
}

/// Properties key of a binding without arguments.
pub(crate) fn properties_key(routing_key: &str) -> String {
    if routing_key.is_empty() {
        "~".to_string()
    } else {
        routing_key.replace('~', "%7E")
    }
}

impl BindingReconciler {
    /// The listed binding matching `binding`. A 404 on the listing means the
    /// source or destination is gone, and the binding with it.
    async fn find_binding(&self, gateway: &dyn Gateway, binding: &Binding) -> Result<Option<BindingInfo>> {
        info!(
            source = %binding.spec.source,
            "binding arguments set; listing bindings from server to complete deletion"
        );
        let wanted = binding_info(binding);
        let listed = match gateway
            .list_bindings_between(
                &binding.spec.vhost,
                &binding.spec.source,
                &binding.spec.destination,
                &binding.spec.destination_type,
            )
            .await
        {
            Ok(listed) => listed,
            Err(OperatorError::Remote { status: 404, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(listed
            .into_iter()
            .rfind(|b| b.routing_key == wanted.routing_key && b.arguments == wanted.arguments))
    }
}

#[async_trait]
impl ReconcileFunc<Binding> for BindingReconciler {
    async fn declare(&self, gateway: &dyn Gateway, binding: &Binding) -> Result<()> {
        validate_response(
            gateway
                .declare_binding(&binding.spec.vhost, &binding_info(binding))
                .await?,
        )
    }

    async fn delete(&self, gateway: &dyn Gateway, binding: &Binding) -> Result<()> {
        let info = if binding.spec.arguments.is_some() {
            match self.find_binding(gateway, binding).await? {
                Some(found) => BindingInfo {
                    destination_type: binding.spec.destination_type.clone(),
                    ..found
                },
                None => {
                    info!("cannot find the corresponding binding info in rabbitmq server; binding already deleted");
                    return Ok(());
                }
            }
        } else {
            BindingInfo {
                properties_key: properties_key(&binding.spec.routing_key),
                ..binding_info(binding)
            }
        };
        validate_delete_response(gateway.delete_binding(&binding.spec.vhost, &info).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::BindingSpec;
    use crate::rabbitmq::testing::FakeGateway;
    use reqwest::Method;
    use serde_json::json;

    fn binding(routing_key: &str, arguments: Option<serde_json::Value>) -> Binding {
        Binding::new(
            "b",
            BindingSpec {
                vhost: "v".to_string(),
                source: "ex".to_string(),
                destination: "q".to_string(),
                destination_type: "queue".to_string(),
                routing_key: routing_key.to_string(),
                arguments,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_properties_key() {
        assert_eq!(properties_key(""), "~");
        assert_eq!(properties_key("a.b"), "a.b");
        assert_eq!(properties_key("a~b~"), "a%7Eb%7E");
    }

    #[tokio::test]
    async fn test_declare_posts_to_queue_endpoint() {
        let gateway = FakeGateway::new();
        BindingReconciler
            .declare(gateway.as_ref(), &binding("rk", Some(json!({"x": 1}))))
            .await
            .unwrap();
        let call = &gateway.calls()[0];
        assert_eq!(call.method, "POST");
        assert_eq!(call.path, "bindings/v/e/ex/q/q");
        assert_eq!(call.body, Some(json!({"routing_key": "rk", "arguments": {"x": 1}})));
    }

    #[tokio::test]
    async fn test_delete_without_arguments_uses_generated_key() {
        let gateway = FakeGateway::new();
        BindingReconciler
            .delete(gateway.as_ref(), &binding("", None))
            .await
            .unwrap();
        assert_eq!(gateway.paths(Method::DELETE), vec!["bindings/v/e/ex/q/q/~"]);
        assert!(gateway.paths(Method::GET).is_empty());
    }

    #[tokio::test]
    async fn test_delete_with_arguments_matches_listed_binding() {
        let gateway = FakeGateway::new();
        gateway.list_returns(json!([
            {"source": "ex", "destination": "q", "destination_type": "queue",
             "routing_key": "rk", "arguments": {"x": 2}, "properties_key": "rk~other"},
            {"source": "ex", "destination": "q", "destination_type": "queue",
             "routing_key": "rk", "arguments": {"x": 1}, "properties_key": "rk~abc"}
        ]));
        BindingReconciler
            .delete(gateway.as_ref(), &binding("rk", Some(json!({"x": 1}))))
            .await
            .unwrap();
        assert_eq!(gateway.paths(Method::GET), vec!["bindings/v/e/ex/q/q"]);
        assert_eq!(gateway.paths(Method::DELETE), vec!["bindings/v/e/ex/q/q/rk~abc"]);
    }

    #[tokio::test]
    async fn test_delete_with_no_listed_match_is_a_noop() {
        let gateway = FakeGateway::new();
        gateway.list_returns(json!([]));
        BindingReconciler
            .delete(gateway.as_ref(), &binding("rk", Some(json!({"x": 1}))))
            .await
            .unwrap();
        assert!(gateway.paths(Method::DELETE).is_empty());
    }

    #[tokio::test]
    async fn test_delete_when_source_or_destination_is_gone() {
        let gateway = FakeGateway::new();
        gateway.respond(Method::GET, 404);
        BindingReconciler
            .delete(
                gateway.as_ref(),
                &binding("0", Some(json!({"x-stream-partition-order": 0}))),
            )
            .await
            .unwrap();
        assert_eq!(gateway.paths(Method::GET), vec!["bindings/v/e/ex/q/q"]);
        assert!(gateway.paths(Method::DELETE).is_empty());
    }

    #[tokio::test]
    async fn test_delete_listing_failure_is_reported() {
        let gateway = FakeGateway::new();
        gateway.respond(Method::GET, 500);
        let err = BindingReconciler
            .delete(gateway.as_ref(), &binding("rk", Some(json!({"x": 1}))))
            .await
            .unwrap_err();
        assert!(matches!(err, OperatorError::Remote { status: 500, .. }));
    }
}
