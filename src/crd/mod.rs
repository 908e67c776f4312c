//! Custom Resource Definitions for the RabbitMQ topology operator
//!
//! Topology resources live in the `rabbitmq.com` group:
//! - `v1beta1`: Vhost, Queue, Exchange, Binding, User, Permission,
//!   TopicPermission, Policy, Federation, Shovel, SchemaReplication
//! - `v1alpha1`: SuperStream
//!
//! `RabbitmqCluster` is owned by the cluster operator; only the fields this
//! operator reads are modelled.

/// Implements [`TopologyResource`] for a kind whose status is an
/// `Option<S>` with `conditions` and `observed_generation` fields.
macro_rules! topology_resource {
    ($kind:ty, $status:ty) => {
        impl $crate::crd::TopologyResource for $kind {
            fn cluster_reference(&self) -> &$crate::crd::RabbitmqClusterReference {
                &self.spec.rabbitmq_cluster_reference
            }

            fn status_conditions(&self) -> &[$crate::crd::Condition] {
                self.status
                    .as_ref()
                    .map(|s| s.conditions.as_slice())
                    .unwrap_or_default()
            }

            fn set_status_conditions(&mut self, conditions: Vec<$crate::crd::Condition>) {
                self.status
                    .get_or_insert_with(<$status>::default)
                    .conditions = conditions;
            }

            fn set_observed_generation(&mut self, generation: i64) {
                self.status
                    .get_or_insert_with(<$status>::default)
                    .observed_generation = Some(generation);
            }
        }
    };
}

mod binding;
mod cluster;
mod common;
mod exchange;
mod federation;
mod permission;
mod policy;
mod queue;
mod schema_replication;
mod shovel;
mod super_stream;
mod topic_permission;
mod user;
mod vhost;

pub use binding::{Binding, BindingSpec};
pub use cluster::{
    DefaultUserStatus, RabbitmqCluster, RabbitmqClusterSpec, RabbitmqClusterStatus,
    ServiceReference, VaultSpec, ALLOWED_NAMESPACES_ANNOTATION,
};
pub use common::{
    Condition, LocalObjectReference, RabbitmqClusterReference, TopologyResource, TopologyStatus,
};
pub use exchange::{Exchange, ExchangeSpec};
pub use federation::{Federation, FederationSpec};
pub use permission::{Permission, PermissionSpec, VhostPermissions};
pub use policy::{Policy, PolicySpec};
pub use queue::{Queue, QueueSpec};
pub use schema_replication::{
    SchemaReplication, SchemaReplicationSecretBackend, SchemaReplicationSpec,
    SchemaReplicationVaultSpec,
};
pub use shovel::{Shovel, ShovelSpec};
pub use super_stream::{SuperStream, SuperStreamSpec, SuperStreamStatus};
pub use topic_permission::{TopicPermission, TopicPermissionConfig, TopicPermissionSpec};
pub use user::{User, UserSpec, UserStatus, UserTag};
pub use vhost::{Vhost, VhostSpec};
