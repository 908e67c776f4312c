//! SuperStream controller
//!
//! A pass expands the super stream into its children (see
//! [`ManagedChild`]) and writes the realized partition names back to the
//! status. The partition count only grows: a lower `partitions` than the
//! status records is rejected without touching any child. Children are
//! removed by garbage collection through their owner references, so there
//! is no finalizer and nothing to clean up on the broker from here.

use super::topology::{handle_reference_error, write_conditions};
use super::{error_policy_backoff, update_status, watched_api, Context, ManagedChild};
use crate::conditions::{self, CONDITION_FALSE};
use crate::crd::{Binding, Exchange, Queue, SuperStream, TopologyResource};
use crate::error::{OperatorError, Result};
use crate::events::{Severity, REASON_FAILED_SCALE_DOWN};
use crate::store;
use futures::StreamExt;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config;
use kube::{Client, Resource, ResourceExt};
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct SuperStreamController {
    ctx: Arc<Context>,
}

/// Routing keys of the partitions, generated as `0..partitions` when none are given.
fn routing_keys(stream: &SuperStream) -> Result<Vec<String>> {
    let spec = &stream.spec;
    if spec.partitions == 0 {
        return Err(OperatorError::InvalidState(
            "a super stream needs at least one partition".to_string(),
        ));
    }
    if spec.routing_keys.is_empty() {
        return Ok((0..spec.partitions).map(|i| i.to_string()).collect());
    }
    if spec.routing_keys.len() != spec.partitions {
        return Err(OperatorError::InvalidState(format!(
            "expected number of routing keys ({}) to match number of partitions ({})",
            spec.routing_keys.len(),
            spec.partitions
        )));
    }
    Ok(spec.routing_keys.clone())
}

impl SuperStreamController {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Run the controller until shutdown.
    pub async fn run(self: Arc<Self>, client: Client, namespace: String) -> Result<()> {
        info!(controller = super::SUPER_STREAM_CONTROLLER, "Starting controller");

        Controller::new(watched_api::<SuperStream>(&client, &namespace), Config::default())
            .owns(watched_api::<Exchange>(&client, &namespace), Config::default())
            .owns(watched_api::<Queue>(&client, &namespace), Config::default())
            .owns(watched_api::<Binding>(&client, &namespace), Config::default())
            .shutdown_on_signal()
            .run(
                |stream, controller| async move {
                    let namespace = stream.namespace().unwrap_or_default();
                    controller.reconcile(&namespace, &stream.name_any()).await
                },
                |stream, error, controller| {
                    error!(controller = super::SUPER_STREAM_CONTROLLER, "Reconciliation error: {:?}", error);
                    error_policy_backoff(stream, error, controller)
                },
                Arc::clone(&self),
            )
            .for_each(|result| async move {
                match result {
                    Ok((stream, _action)) => debug!("Reconciled {}", stream.name),
                    Err(e) => error!("Reconciliation failed: {:?}", e),
                }
            })
            .await;

        Ok(())
    }

    /// One reconciliation pass for `namespace/name`.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action> {
        let store = self.ctx.store.as_ref();
        let Some(stream) = store::get::<SuperStream>(store, namespace, name).await? else {
            return Ok(Action::await_change());
        };
        if stream.meta().deletion_timestamp.is_some() {
            debug!(namespace = %namespace, name = %name, "SuperStream is being deleted");
            return Ok(Action::await_change());
        }

        let reference = match self.ctx.resolver.qualify(stream.cluster_reference(), namespace).await {
            Ok(reference) => reference,
            Err(e) => return handle_reference_error(&self.ctx, &stream, e).await,
        };

        info!(namespace = %namespace, name = %name, "Start reconciling");
        let generation = stream.meta().generation;
        let failure_message = format!("SuperStream {name} failed to reconcile");

        let realized = stream.realized_partitions();
        if stream.spec.partitions < realized {
            let note = format!(
                "SuperStreams cannot be scaled down: an attempt was made to scale from {} partitions to {}",
                realized, stream.spec.partitions
            );
            error!(namespace = %namespace, name = %name, "{}: {}", failure_message, note);
            self.ctx
                .events
                .publish(&stream.object_ref(&()), Severity::Warning, REASON_FAILED_SCALE_DOWN, &note)
                .await;
            write_conditions(&self.ctx, &stream, generation, |previous| {
                conditions::not_ready(&failure_message, previous)
            })
            .await;
            return Ok(Action::await_change());
        }

        let keys = match routing_keys(&stream) {
            Ok(keys) => keys,
            Err(e) => {
                error!(namespace = %namespace, name = %name, "{}: {}", failure_message, e);
                write_conditions(&self.ctx, &stream, generation, |previous| {
                    conditions::not_ready(&failure_message, previous)
                })
                .await;
                return Ok(Action::await_change());
            }
        };

        let owner = store::controller_reference(&stream)?;
        let mut partitions = Vec::with_capacity(keys.len());
        for child in ManagedChild::for_super_stream(&stream, &reference, &keys) {
            if let Err(e) = child.apply(store, &owner).await {
                let reason = format!("FailedReconcile{}", child.resource_type());
                error!(namespace = %namespace, name = %name, "{}: {}", reason, e);
                let message = e.to_string();
                write_conditions(&self.ctx, &stream, generation, |previous| {
                    conditions::replace_ready(previous, CONDITION_FALSE, &reason, Some(message.as_str()))
                })
                .await;
                return Err(e);
            }
            if let Some(queue) = child.partition_queue() {
                partitions.push(queue.to_string());
            }
        }

        let result = update_status::<SuperStream, _>(store, namespace, name, |latest| {
            let next = conditions::ready(latest.status_conditions());
            latest.set_status_conditions(next);
            if let Some(generation) = generation {
                latest.set_observed_generation(generation);
            }
            if let Some(status) = latest.status.as_mut() {
                status.partitions = partitions.clone();
            }
        })
        .await;
        if let Err(e) = result {
            error!(namespace = %namespace, name = %name, "failed to update object status: {}", e);
        }

        info!(namespace = %namespace, name = %name, "Finished reconciling");
        Ok(Action::requeue(self.ctx.config.sync_period))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::{CONDITION_READY, CONDITION_TRUE};
    use crate::controllers::testing::{cluster_reference, Harness, NAMESPACE};
    use crate::crd::{SuperStreamSpec, SuperStreamStatus};
    use std::time::Duration;

    fn stream(partitions: usize, routing_keys: &[&str]) -> SuperStream {
        let mut stream = SuperStream::new(
            "invoices",
            SuperStreamSpec {
                name: "invoices".to_string(),
                vhost: "/".to_string(),
                partitions,
                routing_keys: routing_keys.iter().map(|k| k.to_string()).collect(),
                rabbitmq_cluster_reference: cluster_reference(),
            },
        );
        stream.metadata.namespace = Some(NAMESPACE.to_string());
        stream
    }

    fn controller(h: &Harness) -> SuperStreamController {
        SuperStreamController::new(h.ctx.clone())
    }

    fn stored(h: &Harness) -> SuperStream {
        h.store.fetch(NAMESPACE, "invoices").unwrap()
    }

    fn ready(h: &Harness) -> crate::crd::Condition {
        stored(h).status_conditions()[0].clone()
    }

    async fn set_partitions(h: &Harness, partitions: usize) {
        let mut latest = stored(h);
        latest.spec.partitions = partitions;
        store::replace(h.store.as_ref(), NAMESPACE, &latest).await.unwrap();
    }

    #[test]
    fn test_routing_keys() {
        assert_eq!(routing_keys(&stream(3, &[])).unwrap(), vec!["0", "1", "2"]);
        assert_eq!(routing_keys(&stream(2, &["eu", "us"])).unwrap(), vec!["eu", "us"]);
        assert!(routing_keys(&stream(0, &[])).unwrap_err().is_permanent());
        let err = routing_keys(&stream(3, &["eu", "us"])).unwrap_err();
        assert!(err.is_permanent());
        assert_eq!(
            err.to_string(),
            "expected number of routing keys (2) to match number of partitions (3)"
        );
    }

    #[tokio::test]
    async fn test_creates_children_and_records_partitions() {
        let h = Harness::new();
        h.store.insert(&stream(3, &[]));

        let action = controller(&h).reconcile(NAMESPACE, "invoices").await.unwrap();
        assert_eq!(action, Action::requeue(h.ctx.config.sync_period));

        let exchange: Exchange = h.store.fetch(NAMESPACE, "invoices-exchange").unwrap();
        assert_eq!(exchange.spec.name, "invoices");
        assert_eq!(exchange.spec.rabbitmq_cluster_reference.namespace, NAMESPACE);
        for i in 0..3 {
            let queue: Queue = h.store.fetch(NAMESPACE, &format!("invoices-partition-{i}")).unwrap();
            assert_eq!(queue.spec.name, format!("invoices-{i}"));
            assert_eq!(queue.owner_references()[0].kind, "SuperStream");
            let binding: Binding = h.store.fetch(NAMESPACE, &format!("invoices-binding-{i}")).unwrap();
            assert_eq!(binding.spec.routing_key, i.to_string());
        }

        let status = stored(&h).status.unwrap();
        assert_eq!(status.partitions, vec!["invoices-0", "invoices-1", "invoices-2"]);
        assert_eq!(status.conditions[0].r#type, CONDITION_READY);
        assert_eq!(status.conditions[0].status, CONDITION_TRUE);
        assert_eq!(status.observed_generation, Some(1));
        assert!(h.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_recreates_child_deleted_out_of_band() {
        let h = Harness::new();
        h.store.insert(&stream(2, &[]));
        let c = controller(&h);
        c.reconcile(NAMESPACE, "invoices").await.unwrap();
        let original: Queue = h.store.fetch(NAMESPACE, "invoices-partition-1").unwrap();

        h.store.remove::<Queue>(NAMESPACE, "invoices-partition-1");
        c.reconcile(NAMESPACE, "invoices").await.unwrap();

        let queue: Queue = h.store.fetch(NAMESPACE, "invoices-partition-1").unwrap();
        assert_eq!(queue.spec.name, "invoices-1");
        assert_ne!(queue.uid(), original.uid());
        assert!(queue.creation_timestamp().is_some());
        assert_eq!(queue.owner_references()[0].uid, stored(&h).uid().unwrap());
        assert_eq!(ready(&h).status, CONDITION_TRUE);
    }

    #[tokio::test]
    async fn test_scale_up_extends_partitions() {
        let h = Harness::new();
        h.store.insert(&stream(2, &[]));
        let c = controller(&h);
        c.reconcile(NAMESPACE, "invoices").await.unwrap();

        set_partitions(&h, 4).await;
        c.reconcile(NAMESPACE, "invoices").await.unwrap();

        let status = stored(&h).status.unwrap();
        assert_eq!(
            status.partitions,
            vec!["invoices-0", "invoices-1", "invoices-2", "invoices-3"]
        );
        assert_eq!(status.observed_generation, Some(2));
    }

    #[tokio::test]
    async fn test_scale_down_is_rejected() {
        let h = Harness::new();
        h.store.insert(&stream(3, &[]));
        let c = controller(&h);
        c.reconcile(NAMESPACE, "invoices").await.unwrap();

        set_partitions(&h, 1).await;
        let action = c.reconcile(NAMESPACE, "invoices").await.unwrap();
        assert_eq!(action, Action::await_change());

        let event = h.events.events().pop().unwrap();
        assert_eq!(event.reason, REASON_FAILED_SCALE_DOWN);
        assert_eq!(
            event.note,
            "SuperStreams cannot be scaled down: an attempt was made to scale from 3 partitions to 1"
        );
        let condition = ready(&h);
        assert_eq!(condition.status, CONDITION_FALSE);
        assert_eq!(condition.message.as_deref(), Some("SuperStream invoices failed to reconcile"));

        assert_eq!(stored(&h).realized_partitions(), 3);
        for i in 0..3 {
            assert!(h.store.fetch::<Queue>(NAMESPACE, &format!("invoices-partition-{i}")).is_some());
        }
    }

    #[tokio::test]
    async fn test_routing_key_mismatch_creates_nothing() {
        let h = Harness::new();
        h.store.insert(&stream(3, &["eu", "us"]));

        let action = controller(&h).reconcile(NAMESPACE, "invoices").await.unwrap();
        assert_eq!(action, Action::await_change());

        let condition = ready(&h);
        assert_eq!(condition.status, CONDITION_FALSE);
        assert_eq!(condition.message.as_deref(), Some("SuperStream invoices failed to reconcile"));
        assert!(h.store.fetch::<Exchange>(NAMESPACE, "invoices-exchange").is_none());
    }

    #[tokio::test]
    async fn test_zero_partitions_is_not_ready() {
        let h = Harness::new();
        h.store.insert(&stream(0, &[]));

        let action = controller(&h).reconcile(NAMESPACE, "invoices").await.unwrap();
        assert_eq!(action, Action::await_change());

        assert_eq!(ready(&h).status, CONDITION_FALSE);
        assert!(h.store.fetch::<Exchange>(NAMESPACE, "invoices-exchange").is_none());
    }

    #[tokio::test]
    async fn test_child_failure_names_resource_type() {
        let h = Harness::new();
        let mut s = stream(2, &[]);
        s.status = Some(SuperStreamStatus::default());
        h.store.insert(&s);
        h.store.fail_writes_of("Queue");

        assert!(controller(&h).reconcile(NAMESPACE, "invoices").await.is_err());

        let condition = ready(&h);
        assert_eq!(condition.status, CONDITION_FALSE);
        assert_eq!(condition.reason.as_deref(), Some("FailedReconcilePartition"));
        assert!(stored(&h).status.unwrap().partitions.is_empty());
        assert!(h.store.fetch::<Exchange>(NAMESPACE, "invoices-exchange").is_some());
        assert!(h.store.fetch::<Binding>(NAMESPACE, "invoices-binding-0").is_none());
    }

    #[tokio::test]
    async fn test_missing_cluster_requeues() {
        let h = Harness::without_cluster();
        h.store.insert(&stream(1, &[]));

        let action = controller(&h).reconcile(NAMESPACE, "invoices").await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));
        assert!(h.store.fetch::<Exchange>(NAMESPACE, "invoices-exchange").is_none());
    }
}
