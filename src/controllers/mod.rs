//! Controllers for the RabbitMQ topology operator
//!
//! Every topology kind runs the generic [`TopologyReconciler`] bound to a
//! kind-specific [`ReconcileFunc`]. Super streams run their own
//! [`SuperStreamController`], which expands into child Exchange, Queue and
//! Binding resources.

mod binding;
mod exchange;
mod federation;
mod managed;
mod permission;
mod policy;
mod queue;
mod schema_replication;
mod shovel;
mod super_stream;
mod topic_permission;
mod topology;
mod user;
mod vhost;

pub use binding::BindingReconciler;
pub use exchange::ExchangeReconciler;
pub use federation::FederationReconciler;
pub use managed::ManagedChild;
pub use permission::PermissionReconciler;
pub use policy::PolicyReconciler;
pub use queue::QueueReconciler;
pub use schema_replication::SchemaReplicationReconciler;
pub use shovel::ShovelReconciler;
pub use super_stream::SuperStreamController;
pub use topic_permission::TopicPermissionReconciler;
pub use topology::{finalizer_for, ReconcileFunc, TopologyReconciler};
pub use user::UserReconciler;
pub use vhost::VhostReconciler;

use crate::config::OperatorConfig;
use crate::crd::{
    Binding, Exchange, Federation, Permission, Policy, Queue, SchemaReplication, Shovel,
    TopicPermission, TopologyResource, User, Vhost,
};
use crate::error::{OperatorError, Result};
use crate::events::{EventSink, KubeEventSink};
use crate::rabbitmq::{GatewayFactory, ReferenceResolver, SecretStore};
use crate::retry::retry_on_conflict;
use crate::store::{self, Store};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::controller::Action;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

// Controller names
pub const VHOST_CONTROLLER: &str = "vhost-controller";
pub const QUEUE_CONTROLLER: &str = "queue-controller";
pub const EXCHANGE_CONTROLLER: &str = "exchange-controller";
pub const BINDING_CONTROLLER: &str = "binding-controller";
pub const USER_CONTROLLER: &str = "user-controller";
pub const POLICY_CONTROLLER: &str = "policy-controller";
pub const PERMISSION_CONTROLLER: &str = "permission-controller";
pub const SCHEMA_REPLICATION_CONTROLLER: &str = "schema-replication-controller";
pub const FEDERATION_CONTROLLER: &str = "federation-controller";
pub const SHOVEL_CONTROLLER: &str = "shovel-controller";
pub const SUPER_STREAM_CONTROLLER: &str = "super-stream-controller";
pub const TOPIC_PERMISSION_CONTROLLER: &str = "topic-permission-controller";

/// Collaborators shared by every controller.
pub struct Context {
    pub store: Arc<dyn Store>,
    pub resolver: ReferenceResolver,
    pub gateways: Arc<dyn GatewayFactory>,
    pub events: Arc<dyn EventSink>,
    pub config: OperatorConfig,
}

/// Collaborators every [`Context`] is built from.
#[derive(Clone)]
pub struct Dependencies {
    pub store: Arc<dyn Store>,
    pub resolver: ReferenceResolver,
    pub gateways: Arc<dyn GatewayFactory>,
    pub secret_store: Option<Arc<dyn SecretStore>>,
    pub config: OperatorConfig,
}

impl Dependencies {
    /// Context for one controller, publishing events under its name.
    pub fn context(&self, client: &Client, controller: &'static str) -> Arc<Context> {
        Arc::new(Context {
            store: self.store.clone(),
            resolver: self.resolver.clone(),
            gateways: self.gateways.clone(),
            events: Arc::new(KubeEventSink::new(client.clone(), controller)),
            config: self.config.clone(),
        })
    }
}

/// Running controllers, each yielding its name and exit result.
pub type ControllerTasks = JoinSet<(&'static str, Result<()>)>;

type TopologyTask =
    Box<dyn FnOnce(Client, String) -> futures::future::BoxFuture<'static, Result<()>> + Send>;

fn task<K: TopologyResource>(reconciler: TopologyReconciler<K>) -> TopologyTask {
    let reconciler = Arc::new(reconciler);
    Box::new(move |client, namespace| Box::pin(reconciler.run(client, namespace)))
}

/// Start one controller per topology kind plus the super stream controller.
pub fn spawn_controllers(
    tasks: &mut ControllerTasks,
    client: &Client,
    namespace: &str,
    deps: &Dependencies,
) {
    let store = deps.store.clone();
    macro_rules! topology {
        ($kind:ty, $name:expr, $strategy:expr) => {
            TopologyReconciler::<$kind>::new(deps.context(client, $name), Arc::new($strategy), $name)
        };
    }
    let mut spawn = |name: &'static str, run: TopologyTask| {
        let (client, namespace) = (client.clone(), namespace.to_string());
        tasks.spawn(async move { (name, run(client, namespace).await) });
    };

    spawn(VHOST_CONTROLLER, task(topology!(Vhost, VHOST_CONTROLLER, VhostReconciler)));
    spawn(QUEUE_CONTROLLER, task(topology!(Queue, QUEUE_CONTROLLER, QueueReconciler)));
    spawn(EXCHANGE_CONTROLLER, task(topology!(Exchange, EXCHANGE_CONTROLLER, ExchangeReconciler)));
    spawn(BINDING_CONTROLLER, task(topology!(Binding, BINDING_CONTROLLER, BindingReconciler)));
    spawn(POLICY_CONTROLLER, task(topology!(Policy, POLICY_CONTROLLER, PolicyReconciler)));
    spawn(
        USER_CONTROLLER,
        task(topology!(User, USER_CONTROLLER, UserReconciler::new(store.clone())).owning_secrets()),
    );
    spawn(
        PERMISSION_CONTROLLER,
        task(
            topology!(Permission, PERMISSION_CONTROLLER, PermissionReconciler::new(store.clone()))
                .watching_users(permission::referenced_user_of_permission),
        ),
    );
    spawn(
        TOPIC_PERMISSION_CONTROLLER,
        task(
            topology!(
                TopicPermission,
                TOPIC_PERMISSION_CONTROLLER,
                TopicPermissionReconciler::new(store.clone())
            )
            .watching_users(topic_permission::referenced_user_of_topic_permission),
        ),
    );
    spawn(
        FEDERATION_CONTROLLER,
        task(topology!(Federation, FEDERATION_CONTROLLER, FederationReconciler::new(store.clone()))),
    );
    spawn(
        SHOVEL_CONTROLLER,
        task(topology!(Shovel, SHOVEL_CONTROLLER, ShovelReconciler::new(store.clone()))),
    );
    spawn(
        SCHEMA_REPLICATION_CONTROLLER,
        task(topology!(
            SchemaReplication,
            SCHEMA_REPLICATION_CONTROLLER,
            SchemaReplicationReconciler::new(store.clone(), deps.secret_store.clone())
        )),
    );

    let super_streams = Arc::new(SuperStreamController::new(deps.context(client, SUPER_STREAM_CONTROLLER)));
    let (client, namespace) = (client.clone(), namespace.to_string());
    tasks.spawn(async move { (SUPER_STREAM_CONTROLLER, super_streams.run(client, namespace).await) });
}

/// Requeue delay after a failed reconciliation.
pub fn error_policy_backoff<K, C>(_object: Arc<K>, error: &OperatorError, _ctx: Arc<C>) -> Action {
    if error.is_conflict() {
        Action::requeue(Duration::from_secs(1))
    } else {
        Action::requeue(Duration::from_secs(30))
    }
}

/// Api for `K` in `namespace`, or across all namespaces when empty.
pub(crate) fn watched_api<K>(client: &Client, namespace: &str) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    if namespace.is_empty() {
        Api::all(client.clone())
    } else {
        Api::namespaced(client.clone(), namespace)
    }
}

/// Apply `mutate` to the latest copy of an object and write its status,
/// re-reading and retrying on conflict. A vanished object is not an error.
pub(crate) async fn update_status<K, F>(
    store: &dyn Store,
    namespace: &str,
    name: &str,
    mutate: F,
) -> Result<()>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
    F: Fn(&mut K),
{
    let mutate = &mutate;
    retry_on_conflict(|| async move {
        let Some(mut latest) = store::get::<K>(store, namespace, name).await? else {
            return Ok(());
        };
        mutate(&mut latest);
        store::replace_status(store, namespace, &latest).await?;
        Ok(())
    })
    .await
}

/// Read one key of a Secret in `namespace`.
pub(crate) async fn secret_key(store: &dyn Store, namespace: &str, name: &str, key: &str) -> Result<String> {
    let secret = store::get::<Secret>(store, namespace, name)
        .await?
        .ok_or_else(|| OperatorError::NotFound(format!("secret {namespace}/{name}")))?;
    store::secret_value(&secret, key)
        .ok_or_else(|| OperatorError::Reconciliation(format!("could not find key '{key}' in secret {name}")))
}
