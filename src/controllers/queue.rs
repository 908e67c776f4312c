//! Queue strategy

use super::ReconcileFunc;
use crate::crd::Queue;
use crate::error::Result;
use crate::rabbitmq::settings::{arguments_map, QueueSettings};
use crate::rabbitmq::{validate_delete_response, validate_response, Gateway};
use async_trait::async_trait;
use serde_json::Value;

pub struct QueueReconciler;

/// Queue type travels as the `x-queue-type` argument.
fn queue_settings(queue: &Queue) -> QueueSettings {
    let mut arguments = arguments_map(queue.spec.arguments.as_ref());
    if let Some(kind) = queue.spec.r#type.as_deref().filter(|t| !t.is_empty()) {
        arguments.insert("x-queue-type".to_string(), Value::from(kind));
    }
    QueueSettings {
        durable: queue.spec.durable,
        auto_delete: queue.spec.auto_delete,
        arguments,
    }
}

#[async_trait]
impl ReconcileFunc<Queue> for QueueReconciler {
    async fn declare(&self, gateway: &dyn Gateway, queue: &Queue) -> Result<()> {
        let settings = queue_settings(queue);
        validate_response(
            gateway
                .declare_queue(&queue.spec.vhost, &queue.spec.name, &settings)
                .await?,
        )
    }

    async fn delete(&self, gateway: &dyn Gateway, queue: &Queue) -> Result<()> {
        validate_delete_response(gateway.delete_queue(&queue.spec.vhost, &queue.spec.name).await?)
    }
}
