//! Error types for the RabbitMQ topology operator

use thiserror::Error;

/// Result type alias for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

/// Message reported when a resource references a cluster it is not allowed to use.
pub const NOT_ALLOWED_MESSAGE: &str = "resource is not allowed to reference defined cluster reference. Check the namespace of the resource is allowed as part of the cluster's `rabbitmq.com/topology-allowed-namespaces` annotation";

/// Errors that can occur during operator operations
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeApi(String),

    /// Optimistic concurrency conflict on write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Kubernetes object not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Transport-level HTTP failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// The management API answered with a failure status
    #[error("request failed with status code {status} and body {body}")]
    Remote { status: u16, body: String },

    /// The management API answered 404 to a delete call
    #[error("requested resource was not found on the RabbitMQ server")]
    RemoteNotFound,

    /// The referenced RabbitmqCluster is absent
    #[error("failed to get cluster from reference: {0} Error: RabbitmqCluster object does not exist")]
    ClusterNotFound(String),

    /// Cross-namespace reference rejected by the cluster's allow-list
    #[error("{}", NOT_ALLOWED_MESSAGE)]
    NotAllowed,

    /// The referenced RabbitmqCluster has not published its service yet
    #[error("RabbitmqCluster has no ServiceReference set in status.defaultUser")]
    NoServiceReference,

    /// Secret store failure
    #[error("Secret store error: {0}")]
    SecretStore(String),

    /// A dependency of the resource does not exist; not retried with backoff
    #[error("{0}")]
    MissingDependency(String),

    /// The declared state violates an invariant; not retried with backoff
    #[error("{0}")]
    InvalidState(String),

    /// Reconciliation error
    #[error("Reconciliation error: {0}")]
    Reconciliation(String),
}

impl OperatorError {
    /// Permanent failures are surfaced on the resource status and wait for
    /// the next change instead of feeding the controller's retry backoff.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            OperatorError::MissingDependency(_) | OperatorError::InvalidState(_)
        )
    }

    /// Whether the error is an optimistic concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, OperatorError::Conflict(_))
    }
}

impl From<kube::Error> for OperatorError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 409 => OperatorError::Conflict(ae.message),
            kube::Error::Api(ae) if ae.code == 404 => OperatorError::NotFound(ae.message),
            other => OperatorError::KubeApi(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for OperatorError {
    fn from(err: serde_json::Error) -> Self {
        OperatorError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for OperatorError {
    fn from(err: reqwest::Error) -> Self {
        OperatorError::Http(err.to_string())
    }
}

impl From<url::ParseError> for OperatorError {
    fn from(err: url::ParseError) -> Self {
        OperatorError::Configuration(err.to_string())
    }
}
