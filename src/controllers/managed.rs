//! Child resources of a super stream
//!
//! A super stream named `s` with routing keys `k0..kn` owns:
//! - Exchange `s-exchange` declaring exchange `s`
//! - Queue `s-partition-<i>` declaring stream `s-<ki>`
//! - Binding `s-binding-<i>` from `s` to `s-<ki>` with routing key `ki`
//!
//! Children are written with create-or-update, so one that was deleted out
//! of band is recreated on the next pass.

use crate::crd::{
    Binding, BindingSpec, Exchange, ExchangeSpec, Queue, QueueSpec, RabbitmqClusterReference,
    SuperStream,
};
use crate::error::Result;
use crate::retry::retry_on_conflict;
use crate::store::{self, Operation, Store};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

/// Label naming the super stream that owns a child.
pub const SUPER_STREAM_LABEL: &str = "rabbitmq.com/super-stream";
/// Label carrying the routing key of a partition queue or binding.
pub const SUPER_STREAM_ROUTING_KEY_LABEL: &str = "rabbitmq.com/super-stream-routing-key";

/// Broker name of the stream backing one partition.
pub fn partition_name(super_stream: &str, routing_key: &str) -> String {
    format!("{super_stream}-{routing_key}")
}

/// One desired child of a super stream.
#[derive(Debug, Clone)]
pub enum ManagedChild {
    Exchange(Exchange),
    Partition(Queue),
    Binding(Binding),
}

fn labels(owner: &str, routing_key: Option<&str>) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([(SUPER_STREAM_LABEL.to_string(), owner.to_string())]);
    if let Some(key) = routing_key {
        labels.insert(SUPER_STREAM_ROUTING_KEY_LABEL.to_string(), key.to_string());
    }
    labels
}

impl ManagedChild {
    /// The children of `stream` for `routing_keys`: the exchange first, then
    /// a partition queue and its binding per key.
    pub fn for_super_stream(
        stream: &SuperStream,
        reference: &RabbitmqClusterReference,
        routing_keys: &[String],
    ) -> Vec<ManagedChild> {
        let owner = stream.name_any();
        let namespace = stream.namespace();
        let vhost = &stream.spec.vhost;

        let mut exchange = Exchange::new(
            &format!("{owner}-exchange"),
            ExchangeSpec {
                name: owner.clone(),
                vhost: vhost.clone(),
                durable: true,
                rabbitmq_cluster_reference: reference.clone(),
                ..Default::default()
            },
        );
        exchange.metadata.namespace = namespace.clone();
        exchange.metadata.labels = Some(labels(&owner, None));

        let mut children = vec![ManagedChild::Exchange(exchange)];
        for (index, routing_key) in routing_keys.iter().enumerate() {
            let mut queue = Queue::new(
                &format!("{owner}-partition-{index}"),
                QueueSpec {
                    name: partition_name(&owner, routing_key),
                    vhost: vhost.clone(),
                    r#type: Some("stream".to_string()),
                    durable: true,
                    auto_delete: false,
                    arguments: None,
                    rabbitmq_cluster_reference: reference.clone(),
                },
            );
            queue.metadata.namespace = namespace.clone();
            queue.metadata.labels = Some(labels(&owner, Some(routing_key)));

            let mut binding = Binding::new(
                &format!("{owner}-binding-{index}"),
                BindingSpec {
                    vhost: vhost.clone(),
                    source: owner.clone(),
                    destination: partition_name(&owner, routing_key),
                    destination_type: "queue".to_string(),
                    routing_key: routing_key.clone(),
                    arguments: Some(json!({ "x-stream-partition-order": index })),
                    rabbitmq_cluster_reference: reference.clone(),
                },
            );
            binding.metadata.namespace = namespace.clone();
            binding.metadata.labels = Some(labels(&owner, Some(routing_key)));

            children.push(ManagedChild::Partition(queue));
            children.push(ManagedChild::Binding(binding));
        }
        children
    }

    /// Kind of child, as reported in failure reasons.
    pub fn resource_type(&self) -> &'static str {
        match self {
            ManagedChild::Exchange(_) => "Exchange",
            ManagedChild::Partition(_) => "Partition",
            ManagedChild::Binding(_) => "Binding",
        }
    }

    /// Broker name of the stream when this child is a partition.
    pub fn partition_queue(&self) -> Option<&str> {
        match self {
            ManagedChild::Partition(queue) => Some(&queue.spec.name),
            _ => None,
        }
    }

    /// Create the child, or bring the fields the super stream controls up to
    /// date, and make `owner` its controller.
    pub async fn apply(&self, store: &dyn Store, owner: &OwnerReference) -> Result<Operation> {
        match self {
            ManagedChild::Exchange(desired) => {
                create_or_update_child(store, desired, owner, |existing: &mut Exchange| {
                    existing.spec.name = desired.spec.name.clone();
                    existing.spec.vhost = desired.spec.vhost.clone();
                    existing.spec.durable = desired.spec.durable;
                    existing.spec.rabbitmq_cluster_reference =
                        desired.spec.rabbitmq_cluster_reference.clone();
                })
                .await
            }
            ManagedChild::Partition(desired) => {
                create_or_update_child(store, desired, owner, |existing: &mut Queue| {
                    existing.spec.name = desired.spec.name.clone();
                    existing.spec.vhost = desired.spec.vhost.clone();
                    existing.spec.r#type = desired.spec.r#type.clone();
                    existing.spec.durable = desired.spec.durable;
                    existing.spec.rabbitmq_cluster_reference =
                        desired.spec.rabbitmq_cluster_reference.clone();
                })
                .await
            }
            ManagedChild::Binding(desired) => {
                create_or_update_child(store, desired, owner, |existing: &mut Binding| {
                    existing.spec = desired.spec.clone();
                })
                .await
            }
        }
    }
}

async fn create_or_update_child<K, F>(
    store: &dyn Store,
    desired: &K,
    owner: &OwnerReference,
    update: F,
) -> Result<Operation>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned,
    F: Fn(&mut K),
{
    let namespace = desired.namespace().unwrap_or_default();
    let (namespace, update) = (&namespace, &update);
    retry_on_conflict(|| async move {
        store::create_or_update(store, namespace, desired, |object| {
            update(object);
            store::set_controller_reference(object.meta_mut(), owner.clone())
        })
        .await
    })
    .await
}
