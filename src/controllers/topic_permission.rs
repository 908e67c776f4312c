//! TopicPermission strategy
//!
//! Resolves its user the same way as [`super::PermissionReconciler`].

use super::permission::{missing_user, resolve_user, set_user_owner, ResolvedUser};
use super::ReconcileFunc;
use crate::crd::TopicPermission;
use crate::error::{OperatorError, Result};
use crate::rabbitmq::settings::TopicPermissions;
use crate::rabbitmq::{validate_delete_response, validate_response, Gateway};
use crate::store::Store;
use async_trait::async_trait;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::info;

pub struct TopicPermissionReconciler {
    store: Arc<dyn Store>,
}

impl TopicPermissionReconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn user_of(&self, permission: &TopicPermission) -> Result<ResolvedUser> {
        resolve_user(
            self.store.as_ref(),
            &permission.namespace().unwrap_or_default(),
            &permission.spec.user,
            permission.spec.user_reference.as_ref(),
        )
        .await
    }
}

pub(crate) fn referenced_user_of_topic_permission(permission: &TopicPermission) -> Option<String> {
    permission.spec.user_reference.as_ref().map(|r| r.name.clone())
}

#[async_trait]
impl ReconcileFunc<TopicPermission> for TopicPermissionReconciler {
    async fn declare(&self, gateway: &dyn Gateway, permission: &TopicPermission) -> Result<()> {
        let resolved = self.user_of(permission).await?;
        if resolved.username.is_empty() {
            return Err(missing_user());
        }
        if let Some(owner) = &resolved.owner {
            set_user_owner(self.store.as_ref(), permission, owner).await?;
        }
        let config = &permission.spec.permissions;
        let permissions = TopicPermissions {
            exchange: config.exchange.clone(),
            write: config.write.clone(),
            read: config.read.clone(),
        };
        validate_response(
            gateway
                .update_topic_permissions_in(&permission.spec.vhost, &resolved.username, &permissions)
                .await?,
        )
    }

    async fn delete(&self, gateway: &dyn Gateway, permission: &TopicPermission) -> Result<()> {
        let resolved = self.user_of(permission).await?;
        if resolved.username.is_empty() {
            info!(name = %permission.name_any(), "user already removed; no need to delete topic permission");
            return Ok(());
        }
        let result = validate_delete_response(
            gateway
                .delete_topic_permissions_in(
                    &permission.spec.vhost,
                    &resolved.username,
                    &permission.spec.permissions.exchange,
                )
                .await?,
        );
        if let Err(OperatorError::RemoteNotFound) = result {
            info!(
                user = %resolved.username,
                vhost = %permission.spec.vhost,
                "cannot find user or vhost in rabbitmq server; no need to delete permission"
            );
            return Ok(());
        }
        result
    }
}
