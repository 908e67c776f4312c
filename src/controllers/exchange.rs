//! Exchange strategy

use super::ReconcileFunc;
use crate::crd::Exchange;
use crate::error::Result;
use crate::rabbitmq::settings::{arguments_map, ExchangeSettings};
use crate::rabbitmq::{validate_delete_response, validate_response, Gateway};
use async_trait::async_trait;

pub struct ExchangeReconciler;

#[async_trait]
impl ReconcileFunc<Exchange> for ExchangeReconciler {
    async fn declare(&self, gateway: &dyn Gateway, exchange: &Exchange) -> Result<()> {
        let settings = ExchangeSettings {
            kind: exchange.spec.r#type.clone(),
            durable: exchange.spec.durable,
            auto_delete: exchange.spec.auto_delete,
            arguments: arguments_map(exchange.spec.arguments.as_ref()),
        };
        validate_response(
            gateway
                .declare_exchange(&exchange.spec.vhost, &exchange.spec.name, &settings)
                .await?,
        )
    }

    async fn delete(&self, gateway: &dyn Gateway, exchange: &Exchange) -> Result<()> {
        validate_delete_response(
            gateway
                .delete_exchange(&exchange.spec.vhost, &exchange.spec.name)
                .await?,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ExchangeSpec;
    use crate::rabbitmq::testing::FakeGateway;
    use serde_json::json;

    #[tokio::test]
    async fn test_declare_body() {
        let gateway = FakeGateway::new();
        let exchange = Exchange::new(
            "events",
            ExchangeSpec {
                name: "events".to_string(),
                vhost: "prod".to_string(),
                r#type: "topic".to_string(),
                durable: true,
                ..Default::default()
            },
        );
        ExchangeReconciler.declare(gateway.as_ref(), &exchange).await.unwrap();

        let call = &gateway.calls()[0];
        assert_eq!(call.path, "exchanges/prod/events");
        assert_eq!(
            call.body,
            Some(json!({"type": "topic", "durable": true, "auto_delete": false, "arguments": {}}))
        );
    }

    #[tokio::test]
    async fn test_declare_rejection_is_an_error() {
        let gateway = FakeGateway::new();
        gateway.respond(reqwest::Method::PUT, 400);
        let exchange = Exchange::new("events", ExchangeSpec::default());
        assert!(ExchangeReconciler.declare(gateway.as_ref(), &exchange).await.is_err());
    }
}
