//! Shovel strategy

use super::{secret_key, ReconcileFunc};
use crate::crd::Shovel;
use crate::error::{OperatorError, Result};
use crate::rabbitmq::settings::{split_list, ShovelDefinition};
use crate::rabbitmq::{validate_delete_response, validate_response, Gateway};
use crate::store::Store;
use async_trait::async_trait;
use kube::ResourceExt;
use serde_json::Value;
use std::sync::Arc;

pub struct ShovelReconciler {
    store: Arc<dyn Store>,
}

impl ShovelReconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn uris(&self, shovel: &Shovel) -> Result<(String, String)> {
        let namespace = shovel.namespace().unwrap_or_default();
        let secret_name = &shovel.spec.uri_secret.name;
        let store = self.store.as_ref();
        let src = secret_key(store, &namespace, secret_name, "srcUri").await?;
        let dest = secret_key(store, &namespace, secret_name, "destUri").await?;
        Ok((src, dest))
    }
}

/// `delete-after` is either a message count or a mode such as `queue-length`.
fn delete_after(value: Option<&String>) -> Option<Value> {
    value.map(|v| match v.parse::<i64>() {
        Ok(count) => Value::from(count),
        Err(_) => Value::from(v.as_str()),
    })
}

fn shovel_definition(shovel: &Shovel, src_uri: &str, dest_uri: &str) -> ShovelDefinition {
    let spec = &shovel.spec;
    ShovelDefinition {
        src_uri: split_list(src_uri),
        dest_uri: split_list(dest_uri),
        ack_mode: spec.ack_mode.clone(),
        add_forward_headers: spec.add_forward_headers,
        delete_after: delete_after(spec.delete_after.as_ref()),
        dest_add_forward_headers: spec.dest_add_forward_headers,
        dest_add_timestamp_header: spec.dest_add_timestamp_header,
        dest_address: spec.dest_address.clone(),
        dest_application_properties: spec.dest_application_properties.clone(),
        dest_exchange: spec.dest_exchange.clone(),
        dest_exchange_key: spec.dest_exchange_key.clone(),
        dest_properties: spec.dest_properties.clone(),
        dest_protocol: spec.dest_protocol.clone(),
        dest_publish_properties: spec.dest_publish_properties.clone(),
        dest_queue: spec.dest_queue.clone(),
        prefetch_count: spec.prefetch_count,
        reconnect_delay: spec.reconnect_delay,
        src_address: spec.src_address.clone(),
        src_delete_after: delete_after(spec.src_delete_after.as_ref()),
        src_exchange: spec.src_exchange.clone(),
        src_exchange_key: spec.src_exchange_key.clone(),
        src_prefetch_count: spec.src_prefetch_count,
        src_protocol: spec.src_protocol.clone(),
        src_queue: spec.src_queue.clone(),
    }
}

#[async_trait]
impl ReconcileFunc<Shovel> for ShovelReconciler {
    async fn declare(&self, gateway: &dyn Gateway, shovel: &Shovel) -> Result<()> {
        let (src_uri, dest_uri) = self.uris(shovel).await.map_err(|e| {
            OperatorError::Reconciliation(format!(
                "failed to parse shovel uri secret; secret name: {}, error: {e}",
                shovel.spec.uri_secret.name
            ))
        })?;
        let definition = shovel_definition(shovel, &src_uri, &dest_uri);
        validate_response(
            gateway
                .declare_shovel(&shovel.spec.vhost, &shovel.spec.name, &definition)
                .await?,
        )
    }

    async fn delete(&self, gateway: &dyn Gateway, shovel: &Shovel) -> Result<()> {
        validate_delete_response(
            gateway
                .delete_shovel(&shovel.spec.vhost, &shovel.spec.name)
                .await?,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::testing::{secret, Harness, NAMESPACE};
    use crate::rabbitmq::testing::FakeGateway;
    use serde_json::json;

    fn shovel(delete_after: Option<&str>) -> Shovel {
        let mut shovel: Shovel = serde_json::from_value(json!({
            "apiVersion": "rabbitmq.com/v1beta1",
            "kind": "Shovel",
            "metadata": {"name": "move", "namespace": NAMESPACE},
            "spec": {
                "name": "move-orders",
                "vhost": "v",
                "uriSecret": {"name": "shovel-uris"},
                "srcQueue": "orders",
                "destExchange": "archive",
                "rabbitmqClusterReference": {"name": "rmq"}
            }
        }))
        .unwrap();
        shovel.spec.delete_after = delete_after.map(str::to_string);
        shovel
    }

    #[test]
    fn test_delete_after_number_or_mode() {
        assert_eq!(delete_after(Some(&"100".to_string())), Some(json!(100)));
        assert_eq!(delete_after(Some(&"queue-length".to_string())), Some(json!("queue-length")));
        assert_eq!(delete_after(None), None);
    }

    #[tokio::test]
    async fn test_declare_reads_both_uris() {
        let h = Harness::new();
        h.store.insert(&secret(
            "shovel-uris",
            &[("srcUri", "amqp://src"), ("destUri", "amqp://d1,amqp://d2")],
        ));
        let gateway = FakeGateway::new();

        ShovelReconciler::new(h.store.clone())
            .declare(gateway.as_ref(), &shovel(Some("never")))
            .await
            .unwrap();

        let call = &gateway.calls()[0];
        assert_eq!(call.path, "parameters/shovel/v/move-orders");
        assert_eq!(
            call.body,
            Some(json!({"value": {
                "src-uri": ["amqp://src"],
                "dest-uri": ["amqp://d1", "amqp://d2"],
                "delete-after": "never",
                "dest-exchange": "archive",
                "src-queue": "orders"
            }}))
        );
    }

    #[tokio::test]
    async fn test_missing_dest_uri_fails() {
        let h = Harness::new();
        h.store.insert(&secret("shovel-uris", &[("srcUri", "amqp://src")]));

        let err = ShovelReconciler::new(h.store.clone())
            .declare(FakeGateway::new().as_ref(), &shovel(None))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("could not find key 'destUri' in secret shovel-uris"));
    }
}
