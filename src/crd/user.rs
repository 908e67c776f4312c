//! User Custom Resource Definition
//!
//! A User gets generated (or imported) credentials stored in a Secret named
//! `<user>-user-credentials`, which the status points at.

use crate::crd::{Condition, LocalObjectReference, RabbitmqClusterReference};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// User is the Schema for the users API
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "rabbitmq.com",
    version = "v1beta1",
    kind = "User",
    namespaced,
    status = "UserStatus",
    printcolumn = r#"{"name":"Username","type":"string","jsonPath":".status.username"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    /// Management UI access levels
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<UserTag>,

    pub rabbitmq_cluster_reference: RabbitmqClusterReference,

    /// Secret with `username` and optional `password` to import instead of generating
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_credentials_secret: Option<LocalObjectReference>,
}

/// Level of access to the management UI
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserTag {
    Management,
    Policymaker,
    Monitoring,
    Administrator,
}

impl UserTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserTag::Management => "management",
            UserTag::Policymaker => "policymaker",
            UserTag::Monitoring => "monitoring",
            UserTag::Administrator => "administrator",
        }
    }
}

/// Status of a User
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Secret holding the user credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<LocalObjectReference>,

    /// Username as declared in RabbitMQ
    #[serde(default)]
    pub username: String,
}

impl User {
    /// Name of the Secret holding this user's credentials.
    pub fn credentials_secret_name(&self) -> String {
        format!(
            "{}-user-credentials",
            self.metadata.name.as_deref().unwrap_or_default()
        )
    }

    /// Username recorded in status, empty until credentials are generated.
    pub fn status_username(&self) -> &str {
        self.status
            .as_ref()
            .map(|s| s.username.as_str())
            .unwrap_or_default()
    }
}

topology_resource!(User, UserStatus);
