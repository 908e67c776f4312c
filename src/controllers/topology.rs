//! Generic reconciler shared by every topology kind.
//!
//! A pass loads the resource, resolves its cluster reference, builds a
//! gateway and then either deletes the remote object (resource being
//! deleted) or declares it (resource active). A finalizer is added before
//! anything is declared so the remote side is always cleaned up.

use super::{error_policy_backoff, update_status, watched_api, Context};
use crate::conditions::{self, CONDITION_FALSE, REASON_FAILURE};
use crate::crd::{TopologyResource, User};
use crate::error::{OperatorError, Result, NOT_ALLOWED_MESSAGE};
use crate::events::{
    Severity, REASON_FAILED_CREATE_OR_UPDATE, REASON_FAILED_DELETE,
    REASON_SUCCESSFUL_CREATE_OR_UPDATE, REASON_SUCCESSFUL_DELETE,
};
use crate::rabbitmq::Gateway;
use crate::retry::retry_on_conflict;
use crate::store;
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config;
use kube::{Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Delay before retrying a resource whose cluster does not exist (yet).
const CLUSTER_ABSENT_REQUEUE: Duration = Duration::from_secs(10);

/// Kind-specific declare and delete against the management API.
#[async_trait]
pub trait ReconcileFunc<K>: Send + Sync {
    async fn declare(&self, gateway: &dyn Gateway, resource: &K) -> Result<()>;

    /// Remove the remote object. [`OperatorError::RemoteNotFound`] counts as success.
    async fn delete(&self, gateway: &dyn Gateway, resource: &K) -> Result<()>;
}

/// Finalizer token for a kind: `deletion.finalizers.<plural>.rabbitmq.com`.
pub fn finalizer_for(kind: &str) -> String {
    let kind = kind.to_lowercase();
    let plural = match kind.strip_suffix('y') {
        Some(stem) => format!("{stem}ies"),
        None => format!("{kind}s"),
    };
    format!("deletion.finalizers.{plural}.rabbitmq.com")
}

/// Drives one topology kind through the finalizer and status state machine.
pub struct TopologyReconciler<K> {
    ctx: Arc<Context>,
    strategy: Arc<dyn ReconcileFunc<K>>,
    name: &'static str,
    owns_secrets: bool,
    referenced_user: Option<fn(&K) -> Option<String>>,
}

impl<K: TopologyResource> TopologyReconciler<K> {
    pub fn new(ctx: Arc<Context>, strategy: Arc<dyn ReconcileFunc<K>>, name: &'static str) -> Self {
        Self {
            ctx,
            strategy,
            name,
            owns_secrets: false,
            referenced_user: None,
        }
    }

    /// Also reconcile when a Secret controlled by a resource of this kind changes.
    pub fn owning_secrets(mut self) -> Self {
        self.owns_secrets = true;
        self
    }

    /// Also reconcile resources whose User (named by `referenced_user`) changes.
    pub fn watching_users(mut self, referenced_user: fn(&K) -> Option<String>) -> Self {
        self.referenced_user = Some(referenced_user);
        self
    }

    /// Run the controller until shutdown.
    pub async fn run(self: Arc<Self>, client: Client, namespace: String) -> Result<()> {
        info!(controller = self.name, "Starting controller");

        let mut controller = Controller::new(watched_api::<K>(&client, &namespace), Config::default());
        if self.owns_secrets {
            controller = controller.owns(watched_api::<Secret>(&client, &namespace), Config::default());
        }
        if let Some(referenced_user) = self.referenced_user {
            let cache = controller.store();
            controller = controller.watches(
                watched_api::<User>(&client, &namespace),
                Config::default(),
                move |user: User| {
                    let (user_namespace, user_name) = (user.namespace(), user.name_any());
                    cache
                        .state()
                        .into_iter()
                        .filter(|o| {
                            o.namespace() == user_namespace
                                && referenced_user(o).as_deref() == Some(user_name.as_str())
                        })
                        .map(|o| ObjectRef::from_obj(o.as_ref()))
                        .collect::<Vec<_>>()
                },
            );
        }
        controller
            .shutdown_on_signal()
            .run(
                |object, reconciler| async move {
                    let namespace = object.namespace().unwrap_or_default();
                    reconciler.reconcile(&namespace, &object.name_any()).await
                },
                |object, error, reconciler| {
                    error!(controller = reconciler.name, "Reconciliation error: {:?}", error);
                    error_policy_backoff(object, error, reconciler)
                },
                Arc::clone(&self),
            )
            .for_each(|result| async move {
                match result {
                    Ok((object, _action)) => debug!("Reconciled {}", object.name),
                    Err(e) => error!("Reconciliation failed: {:?}", e),
                }
            })
            .await;

        Ok(())
    }

    /// One reconciliation pass for `namespace/name`.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action> {
        let store = self.ctx.store.as_ref();
        let Some(object) = store::get::<K>(store, namespace, name).await? else {
            debug!(namespace = %namespace, name = %name, "Resource is gone");
            return Ok(Action::await_change());
        };
        let kind = K::kind(&()).to_lowercase();

        let (credentials, tls_enabled) =
            match self.ctx.resolver.resolve(object.cluster_reference(), namespace).await {
                Ok(resolved) => resolved,
                Err(e) => return handle_reference_error(&self.ctx, &object, e).await,
            };
        let gateway = self.ctx.gateways.build(&credentials, tls_enabled).map_err(|e| {
            error!(namespace = %namespace, name = %name, "failed to generate http rabbitClient: {}", e);
            e
        })?;

        if object.meta().deletion_timestamp.is_some() {
            return self.finalize(&object, gateway.as_ref(), &kind).await;
        }

        let object = ensure_finalizer(&self.ctx, &object).await?;
        info!(namespace = %namespace, name = %name, kind = %kind, "Start reconciling");

        let generation = object.meta().generation;
        match self.strategy.declare(gateway.as_ref(), &object).await {
            Ok(()) => {
                let note = format!("successfully declared {kind}");
                info!(namespace = %namespace, name = %name, "{}", note);
                self.ctx
                    .events
                    .publish(&object.object_ref(&()), Severity::Normal, REASON_SUCCESSFUL_CREATE_OR_UPDATE, &note)
                    .await;
                write_conditions(&self.ctx, &object, generation, |previous| {
                    conditions::ready(previous)
                })
                .await;
                info!(namespace = %namespace, name = %name, "Finished reconciling");
                Ok(Action::requeue(self.ctx.config.sync_period))
            }
            Err(e) => {
                let note = format!("failed to declare {kind}");
                error!(namespace = %namespace, name = %name, "{}: {}", note, e);
                self.ctx
                    .events
                    .publish(&object.object_ref(&()), Severity::Warning, REASON_FAILED_CREATE_OR_UPDATE, &note)
                    .await;
                let message = e.to_string();
                write_conditions(&self.ctx, &object, None, |previous| {
                    conditions::not_ready(&message, previous)
                })
                .await;
                if e.is_permanent() {
                    Ok(Action::await_change())
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn finalize(&self, object: &K, gateway: &dyn Gateway, kind: &str) -> Result<Action> {
        let name = object.name_any();
        info!(name = %name, kind = %kind, "Deleting");
        match self.strategy.delete(gateway, object).await {
            Ok(()) => {}
            Err(OperatorError::RemoteNotFound) => {
                info!(name = %name, "{} already absent from the cluster", kind);
            }
            Err(e) => {
                let note = format!("failed to delete {kind}");
                error!(name = %name, "{}: {}", note, e);
                self.ctx
                    .events
                    .publish(&object.object_ref(&()), Severity::Warning, REASON_FAILED_DELETE, &note)
                    .await;
                return Err(e);
            }
        }
        let note = format!("successfully deleted {kind}");
        info!(name = %name, "{}", note);
        self.ctx
            .events
            .publish(&object.object_ref(&()), Severity::Normal, REASON_SUCCESSFUL_DELETE, &note)
            .await;
        remove_finalizer(&self.ctx, object).await?;
        Ok(Action::await_change())
    }
}

/// Map a reference resolution failure onto the next action.
///
/// A missing cluster while deleting means there is nothing left to clean up.
/// A missing cluster otherwise is retried after a short delay. A rejected
/// cross-namespace reference is reported on the status and not retried.
pub(crate) async fn handle_reference_error<K: TopologyResource>(
    ctx: &Context,
    object: &K,
    error: OperatorError,
) -> Result<Action> {
    let name = object.name_any();
    match error {
        OperatorError::ClusterNotFound(_) if object.meta().deletion_timestamp.is_some() => {
            info!(name = %name, "RabbitmqCluster is already gone: cannot find its connection secret");
            ctx.events
                .publish(
                    &object.object_ref(&()),
                    Severity::Normal,
                    REASON_SUCCESSFUL_DELETE,
                    &format!("successfully deleted {name}"),
                )
                .await;
            remove_finalizer(ctx, object).await?;
            Ok(Action::await_change())
        }
        OperatorError::ClusterNotFound(_) => {
            info!(name = %name, "Could not generate rabbitClient for non existent cluster: {}", error);
            Ok(Action::requeue(CLUSTER_ABSENT_REQUEUE))
        }
        OperatorError::NotAllowed => {
            info!(name = %name, "Could not create resource: {}", error);
            write_conditions(ctx, object, None, |previous| {
                conditions::replace_ready(previous, CONDITION_FALSE, REASON_FAILURE, Some(NOT_ALLOWED_MESSAGE))
            })
            .await;
            Ok(Action::await_change())
        }
        other => {
            error!(name = %name, "failed to retrieve cluster from reference: {}", other);
            Err(other)
        }
    }
}

/// Write a new condition list, computed from the latest stored conditions.
/// Write failures are logged; the next pass rewrites the status anyway.
pub(crate) async fn write_conditions<K, F>(ctx: &Context, object: &K, generation: Option<i64>, build: F)
where
    K: TopologyResource,
    F: Fn(&[crate::crd::Condition]) -> Vec<crate::crd::Condition>,
{
    let namespace = object.namespace().unwrap_or_default();
    let name = object.name_any();
    let result = update_status::<K, _>(ctx.store.as_ref(), &namespace, &name, |latest| {
        let next = build(latest.status_conditions());
        latest.set_status_conditions(next);
        if let Some(generation) = generation {
            latest.set_observed_generation(generation);
        }
    })
    .await;
    if let Err(e) = result {
        error!(namespace = %namespace, name = %name, "failed to update object status: {}", e);
    }
}

/// Add the kind's finalizer unless present; returns the latest object.
pub(crate) async fn ensure_finalizer<K: TopologyResource>(ctx: &Context, object: &K) -> Result<K> {
    let finalizer = finalizer_for(&K::kind(&()));
    if object.finalizers().contains(&finalizer) {
        return Ok(object.clone());
    }
    let store = ctx.store.as_ref();
    let namespace = object.namespace().unwrap_or_default();
    let name = object.name_any();
    let (namespace, name, finalizer) = (&namespace, &name, &finalizer);
    retry_on_conflict(|| async move {
        let mut latest = store::get::<K>(store, namespace, name)
            .await?
            .ok_or_else(|| OperatorError::NotFound(name.to_string()))?;
        if latest.finalizers().contains(finalizer) {
            return Ok(latest);
        }
        latest.finalizers_mut().push(finalizer.clone());
        store::replace(store, namespace, &latest).await
    })
    .await
}

/// Drop the kind's finalizer so the resource can go away.
pub(crate) async fn remove_finalizer<K: TopologyResource>(ctx: &Context, object: &K) -> Result<()> {
    let finalizer = finalizer_for(&K::kind(&()));
    let store = ctx.store.as_ref();
    let namespace = object.namespace().unwrap_or_default();
    let name = object.name_any();
    let (namespace, name, finalizer) = (&namespace, &name, &finalizer);
    retry_on_conflict(|| async move {
        let Some(mut latest) = store::get::<K>(store, namespace, name).await? else {
            return Ok(());
        };
        if !latest.finalizers().contains(finalizer) {
            return Ok(());
        }
        latest.finalizers_mut().retain(|f| f != finalizer);
        store::replace(store, namespace, &latest).await?;
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::{CONDITION_READY, CONDITION_TRUE};
    use crate::controllers::testing::{cluster_reference, Harness, NAMESPACE};
    use crate::controllers::VhostReconciler;
    use crate::crd::{ALLOWED_NAMESPACES_ANNOTATION, RabbitmqCluster, RabbitmqClusterReference, Vhost, VhostSpec};
    use reqwest::Method;

    const FIXED_TIME: &str = "2024-01-01T00:00:00Z";

    fn vhost(name: &str) -> Vhost {
        let mut vhost = Vhost::new(
            name,
            VhostSpec {
                name: name.to_string(),
                tracing: false,
                tags: vec!["prod".to_string()],
                rabbitmq_cluster_reference: cluster_reference(),
            },
        );
        vhost.metadata.namespace = Some(NAMESPACE.to_string());
        vhost
    }

    fn reconciler(h: &Harness) -> TopologyReconciler<Vhost> {
        TopologyReconciler::new(h.ctx.clone(), Arc::new(VhostReconciler), "vhost-controller")
    }

    fn ready(h: &Harness, name: &str) -> crate::crd::Condition {
        let stored: Vhost = h.store.fetch(NAMESPACE, name).unwrap();
        stored.status_conditions()[0].clone()
    }

    async fn pin_transition_time(h: &Harness, name: &str) {
        update_status::<Vhost, _>(h.store.as_ref(), NAMESPACE, name, |v| {
            let mut conditions = v.status_conditions().to_vec();
            conditions[0].last_transition_time = Some(FIXED_TIME.to_string());
            v.set_status_conditions(conditions);
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_finalizer_for() {
        assert_eq!(finalizer_for("Vhost"), "deletion.finalizers.vhosts.rabbitmq.com");
        assert_eq!(finalizer_for("Policy"), "deletion.finalizers.policies.rabbitmq.com");
        assert_eq!(
            finalizer_for("SchemaReplication"),
            "deletion.finalizers.schemareplications.rabbitmq.com"
        );
        assert_eq!(
            finalizer_for("TopicPermission"),
            "deletion.finalizers.topicpermissions.rabbitmq.com"
        );
    }

    #[tokio::test]
    async fn test_absent_resource_is_converged() {
        let h = Harness::new();
        let action = reconciler(&h).reconcile(NAMESPACE, "missing").await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(h.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_declare_adds_finalizer_and_sets_ready() {
        let h = Harness::new();
        h.store.insert(&vhost("orders"));

        let action = reconciler(&h).reconcile(NAMESPACE, "orders").await.unwrap();
        assert_eq!(action, Action::requeue(h.ctx.config.sync_period));

        let stored: Vhost = h.store.fetch(NAMESPACE, "orders").unwrap();
        assert_eq!(stored.finalizers(), &["deletion.finalizers.vhosts.rabbitmq.com".to_string()]);
        let status = stored.status.unwrap();
        assert_eq!(status.observed_generation, Some(1));
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].r#type, CONDITION_READY);
        assert_eq!(status.conditions[0].status, CONDITION_TRUE);
        assert_eq!(status.conditions[0].reason.as_deref(), Some("SuccessfulCreateOrUpdate"));

        assert_eq!(h.gateway.paths(Method::PUT), vec!["vhosts/orders"]);
        assert_eq!(h.events.reasons(), vec![REASON_SUCCESSFUL_CREATE_OR_UPDATE]);
    }

    #[tokio::test]
    async fn test_repeated_success_keeps_transition_time() {
        let h = Harness::new();
        h.store.insert(&vhost("orders"));
        let r = reconciler(&h);

        r.reconcile(NAMESPACE, "orders").await.unwrap();
        pin_transition_time(&h, "orders").await;
        r.reconcile(NAMESPACE, "orders").await.unwrap();

        let condition = ready(&h, "orders");
        assert_eq!(condition.status, CONDITION_TRUE);
        assert_eq!(condition.last_transition_time.as_deref(), Some(FIXED_TIME));
    }

    #[tokio::test]
    async fn test_declare_failure_sets_not_ready_and_flips_back() {
        let h = Harness::new();
        h.store.insert(&vhost("orders"));
        let r = reconciler(&h);

        h.gateway.respond(Method::PUT, 500);
        let err = r.reconcile(NAMESPACE, "orders").await.unwrap_err();
        assert!(matches!(err, OperatorError::Remote { status: 500, .. }));

        let condition = ready(&h, "orders");
        assert_eq!(condition.status, CONDITION_FALSE);
        assert_eq!(condition.reason.as_deref(), Some(REASON_FAILURE));
        assert!(condition.message.unwrap().contains("500"));
        assert_eq!(h.events.events()[0].severity, Severity::Warning);
        assert_eq!(h.events.reasons(), vec![REASON_FAILED_CREATE_OR_UPDATE]);

        let stored: Vhost = h.store.fetch(NAMESPACE, "orders").unwrap();
        assert!(stored.status.unwrap().observed_generation.is_none());

        pin_transition_time(&h, "orders").await;
        h.gateway.respond(Method::PUT, 204);
        r.reconcile(NAMESPACE, "orders").await.unwrap();
        let condition = ready(&h, "orders");
        assert_eq!(condition.status, CONDITION_TRUE);
        assert_ne!(condition.last_transition_time.as_deref(), Some(FIXED_TIME));
    }

    #[tokio::test]
    async fn test_status_conflicts_are_retried() {
        let h = Harness::new();
        h.store.insert(&vhost("orders"));
        h.store.inject_status_conflicts(2);

        reconciler(&h).reconcile(NAMESPACE, "orders").await.unwrap();
        assert_eq!(ready(&h, "orders").status, CONDITION_TRUE);
    }

    #[tokio::test]
    async fn test_delete_treats_remote_404_as_success() {
        let h = Harness::new();
        h.store.insert(&vhost("orders"));
        let r = reconciler(&h);
        r.reconcile(NAMESPACE, "orders").await.unwrap();

        h.store.mark_deleted::<Vhost>(NAMESPACE, "orders");
        h.gateway.respond(Method::DELETE, 404);
        let action = r.reconcile(NAMESPACE, "orders").await.unwrap();

        assert_eq!(action, Action::await_change());
        assert!(h.store.fetch::<Vhost>(NAMESPACE, "orders").is_none());
        assert_eq!(h.gateway.paths(Method::DELETE), vec!["vhosts/orders"]);
        let last = h.events.events().pop().unwrap();
        assert_eq!(last.reason, REASON_SUCCESSFUL_DELETE);
        assert_eq!(last.note, "successfully deleted vhost");
    }

    #[tokio::test]
    async fn test_delete_failure_keeps_finalizer() {
        let h = Harness::new();
        h.store.insert(&vhost("orders"));
        let r = reconciler(&h);
        r.reconcile(NAMESPACE, "orders").await.unwrap();

        h.store.mark_deleted::<Vhost>(NAMESPACE, "orders");
        h.gateway.respond(Method::DELETE, 503);
        assert!(r.reconcile(NAMESPACE, "orders").await.is_err());

        let stored: Vhost = h.store.fetch(NAMESPACE, "orders").unwrap();
        assert_eq!(stored.finalizers().len(), 1);
        let last = h.events.events().pop().unwrap();
        assert_eq!(last.reason, REASON_FAILED_DELETE);
        assert_eq!(last.severity, Severity::Warning);
    }

    #[tokio::test]
    async fn test_missing_cluster_requeues_without_status() {
        let h = Harness::without_cluster();
        h.store.insert(&vhost("orders"));

        let action = reconciler(&h).reconcile(NAMESPACE, "orders").await.unwrap();
        assert_eq!(action, Action::requeue(CLUSTER_ABSENT_REQUEUE));
        let stored: Vhost = h.store.fetch(NAMESPACE, "orders").unwrap();
        assert!(stored.status.is_none());
        assert!(stored.finalizers().is_empty());
    }

    #[tokio::test]
    async fn test_missing_cluster_while_deleting_completes_deletion() {
        let h = Harness::without_cluster();
        let mut v = vhost("orders");
        v.metadata.finalizers = Some(vec![finalizer_for("Vhost")]);
        h.store.insert(&v);
        h.store.mark_deleted::<Vhost>(NAMESPACE, "orders");

        let action = reconciler(&h).reconcile(NAMESPACE, "orders").await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(h.store.fetch::<Vhost>(NAMESPACE, "orders").is_none());
        assert!(h.gateway.calls().is_empty());
        assert_eq!(h.events.events()[0].note, "successfully deleted orders");
    }

    #[tokio::test]
    async fn test_cross_namespace_reference_not_allowed() {
        let h = Harness::without_cluster();
        crate::controllers::testing::seed_cluster(&h.store, "rabbitmq-system");
        let mut v = vhost("orders");
        v.spec.rabbitmq_cluster_reference = RabbitmqClusterReference {
            name: "rmq".to_string(),
            namespace: "rabbitmq-system".to_string(),
            connection_secret: None,
        };
        h.store.insert(&v);
        let r = reconciler(&h);

        let action = r.reconcile(NAMESPACE, "orders").await.unwrap();
        assert_eq!(action, Action::await_change());
        let condition = ready(&h, "orders");
        assert_eq!(condition.status, CONDITION_FALSE);
        assert_eq!(condition.message.as_deref(), Some(NOT_ALLOWED_MESSAGE));
        assert!(h.gateway.calls().is_empty());

        let mut cluster: RabbitmqCluster = h.store.fetch("rabbitmq-system", "rmq").unwrap();
        cluster.metadata.annotations = Some(
            [(ALLOWED_NAMESPACES_ANNOTATION.to_string(), "*".to_string())].into(),
        );
        store::replace(h.store.as_ref(), "rabbitmq-system", &cluster).await.unwrap();
        r.reconcile(NAMESPACE, "orders").await.unwrap();
        assert_eq!(ready(&h, "orders").status, CONDITION_TRUE);
    }

    #[tokio::test]
    async fn test_other_reference_errors_propagate() {
        let h = Harness::without_cluster();
        let mut cluster = RabbitmqCluster::new("rmq", Default::default());
        cluster.metadata.namespace = Some(NAMESPACE.to_string());
        h.store.insert(&cluster);
        h.store.insert(&vhost("orders"));

        let err = reconciler(&h).reconcile(NAMESPACE, "orders").await.unwrap_err();
        assert!(matches!(err, OperatorError::NoServiceReference));
    }
}
