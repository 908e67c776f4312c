//! RabbitMQ messaging topology operator
//!
//! Reconciles topology custom resources against the management API of the
//! RabbitMQ clusters they reference.
//!
//! ## Custom Resources
//!
//! - `Vhost`, `Queue`, `Exchange`, `Binding`, `Policy`: broker objects
//! - `User`, `Permission`, `TopicPermission`: users and their access
//! - `Federation`, `Shovel`, `SchemaReplication`: cross-cluster links
//! - `SuperStream`: a partitioned stream, expanded into Exchange, Queue and
//!   Binding resources
//!
//! ## Example
//!
//! ```yaml
//! apiVersion: rabbitmq.com/v1beta1
//! kind: Queue
//! metadata:
//!   name: orders
//! spec:
//!   name: orders
//!   type: quorum
//!   durable: true
//!   rabbitmqClusterReference:
//!     name: my-rabbit
//! ```

pub mod conditions;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod events;
pub mod leader_election;
pub mod rabbitmq;
pub mod retry;
pub mod store;

pub use config::OperatorConfig;
pub use controllers::{spawn_controllers, ControllerTasks, Dependencies};
pub use error::{OperatorError, Result};
