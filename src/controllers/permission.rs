//! Permission strategy
//!
//! A permission names its user directly or through a User resource. A
//! referenced User must have generated its username before permissions can
//! be granted; once it has, the permission becomes controlled by the User
//! so it is garbage collected with it.

use super::ReconcileFunc;
use crate::crd::{LocalObjectReference, Permission, TopologyResource, User};
use crate::error::{OperatorError, Result};
use crate::rabbitmq::settings::Permissions;
use crate::rabbitmq::{validate_delete_response, validate_response, Gateway};
use crate::retry::retry_on_conflict;
use crate::store::{self, Store};
use async_trait::async_trait;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{error, info};

/// Username of a permission and the User resource it was taken from.
pub(crate) struct ResolvedUser {
    pub username: String,
    pub owner: Option<User>,
}

/// Username from `user`, or from the status of the referenced User.
///
/// An absent User leaves the username empty. A User that has not recorded
/// its username yet is an error.
pub(crate) async fn resolve_user(
    store: &dyn Store,
    namespace: &str,
    user: &str,
    reference: Option<&LocalObjectReference>,
) -> Result<ResolvedUser> {
    let Some(reference) = reference else {
        return Ok(ResolvedUser {
            username: user.to_string(),
            owner: None,
        });
    };
    let Some(found) = store::get::<User>(store, namespace, &reference.name).await? else {
        error!(user_reference = %reference.name, "failed to get User: user doesn't exist");
        return Ok(ResolvedUser {
            username: user.to_string(),
            owner: None,
        });
    };
    if found.status_username().is_empty() {
        error!(user_reference = %reference.name, "failed to get User");
        return Err(OperatorError::Reconciliation(
            "this User does not have an username set in its status".to_string(),
        ));
    }
    Ok(ResolvedUser {
        username: found.status_username().to_string(),
        owner: Some(found),
    })
}

/// Make `owner` the controller of the stored copy of `object`.
pub(crate) async fn set_user_owner<K: TopologyResource>(store: &dyn Store, object: &K, owner: &User) -> Result<()> {
    let reference = store::controller_reference(owner)?;
    let namespace = object.namespace().unwrap_or_default();
    let name = object.name_any();
    let (reference, namespace, name) = (&reference, &namespace, &name);
    retry_on_conflict(|| async move {
        let mut latest = store::get::<K>(store, namespace, name)
            .await?
            .ok_or_else(|| OperatorError::NotFound(name.to_string()))?;
        let before = latest.meta().owner_references.clone();
        store::set_controller_reference(latest.meta_mut(), reference.clone()).map_err(|e| {
            OperatorError::Reconciliation(format!("failed set controller reference: {e}"))
        })?;
        if latest.meta().owner_references == before {
            return Ok(());
        }
        store::replace(store, namespace, &latest).await.map_err(|e| match e {
            OperatorError::Conflict(_) => e,
            other => OperatorError::Reconciliation(format!(
                "failed to Update object with controller reference: {other}"
            )),
        })?;
        Ok(())
    })
    .await
}

pub(crate) fn missing_user() -> OperatorError {
    OperatorError::MissingDependency("failed create Permission, missing User".to_string())
}

pub struct PermissionReconciler {
    store: Arc<dyn Store>,
}

impl PermissionReconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn user_of(&self, permission: &Permission) -> Result<ResolvedUser> {
        resolve_user(
            self.store.as_ref(),
            &permission.namespace().unwrap_or_default(),
            &permission.spec.user,
            permission.spec.user_reference.as_ref(),
        )
        .await
    }
}

/// Name of the User a permission references, if any.
pub(crate) fn referenced_user_of_permission(permission: &Permission) -> Option<String> {
    permission.spec.user_reference.as_ref().map(|r| r.name.clone())
}

#[async_trait]
impl ReconcileFunc<Permission> for PermissionReconciler {
    async fn declare(&self, gateway: &dyn Gateway, permission: &Permission) -> Result<()> {
        let resolved = self.user_of(permission).await?;
        if resolved.username.is_empty() {
            return Err(missing_user());
        }
        if let Some(owner) = &resolved.owner {
            set_user_owner(self.store.as_ref(), permission, owner).await?;
        }
        let permissions = Permissions {
            configure: permission.spec.permissions.configure.clone(),
            write: permission.spec.permissions.write.clone(),
            read: permission.spec.permissions.read.clone(),
        };
        validate_response(
            gateway
                .update_permissions_in(&permission.spec.vhost, &resolved.username, &permissions)
                .await?,
        )
    }

    async fn delete(&self, gateway: &dyn Gateway, permission: &Permission) -> Result<()> {
        let resolved = self.user_of(permission).await?;
        if resolved.username.is_empty() {
            info!(name = %permission.name_any(), "user already removed; no need to delete permission");
            return Ok(());
        }
        let result = validate_delete_response(
            gateway
                .clear_permissions_in(&permission.spec.vhost, &resolved.username)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::testing::{cluster_reference, Harness, NAMESPACE};
    use crate::controllers::TopologyReconciler;
    use crate::crd::{PermissionSpec, UserSpec, UserStatus, VhostPermissions};
    use crate::rabbitmq::testing::FakeGateway;
    use kube::runtime::controller::Action;
    use reqwest::Method;
    use serde_json::json;

    fn permission(user: &str, reference: Option<&str>) -> Permission {
        let mut permission = Permission::new(
            "grant",
            PermissionSpec {
                user: user.to_string(),
                user_reference: reference.map(LocalObjectReference::new),
                vhost: "/".to_string(),
                permissions: VhostPermissions {
                    configure: ".*".to_string(),
                    write: ".*".to_string(),
                    read: "".to_string(),
                },
                rabbitmq_cluster_reference: cluster_reference(),
            },
        );
        permission.metadata.namespace = Some(NAMESPACE.to_string());
        permission
    }

    fn seed_user(h: &Harness, username: &str) -> User {
        let mut user = User::new(
            "alice",
            UserSpec {
                tags: vec![],
                rabbitmq_cluster_reference: cluster_reference(),
                import_credentials_secret: None,
            },
        );
        user.metadata.namespace = Some(NAMESPACE.to_string());
        user.status = Some(UserStatus {
            username: username.to_string(),
            ..Default::default()
        });
        h.store.insert(&user)
    }

    #[tokio::test]
    async fn test_declare_with_explicit_user() {
        let h = Harness::new();
        let gateway = FakeGateway::new();
        let permission = h.store.insert(&permission("bob", None));

        PermissionReconciler::new(h.store.clone())
            .declare(gateway.as_ref(), &permission)
            .await
            .unwrap();

        let call = &gateway.calls()[0];
        assert_eq!(call.method, "PUT");
        assert_eq!(call.path, "permissions///bob");
        assert_eq!(call.body, Some(json!({"configure": ".*", "write": ".*", "read": ""})));
    }

    #[tokio::test]
    async fn test_declare_with_user_reference_sets_owner() {
        let h = Harness::new();
        let gateway = FakeGateway::new();
        let user = seed_user(&h, "generated");
        let permission = h.store.insert(&permission("", Some("alice")));

        PermissionReconciler::new(h.store.clone())
            .declare(gateway.as_ref(), &permission)
            .await
            .unwrap();

        assert_eq!(gateway.paths(Method::PUT), vec!["permissions///generated"]);
        let stored: Permission = h.store.fetch(NAMESPACE, "grant").unwrap();
        let owners = stored.metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].uid, user.uid().unwrap());
        assert_eq!(owners[0].controller, Some(true));
    }

    #[tokio::test]
    async fn test_missing_user_is_permanent() {
        let h = Harness::new();
        h.store.insert(&permission("", Some("alice")));
        let reconciler = TopologyReconciler::new(
            h.ctx.clone(),
            Arc::new(PermissionReconciler::new(h.store.clone())),
            "permission-controller",
        );

        let action = reconciler.reconcile(NAMESPACE, "grant").await.unwrap();
        assert_eq!(action, Action::await_change());
        let stored: Permission = h.store.fetch(NAMESPACE, "grant").unwrap();
        let condition = &stored.status_conditions()[0];
        assert_eq!(condition.status, "False");
        assert_eq!(condition.message.as_deref(), Some("failed create Permission, missing User"));
        assert!(h.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_user_without_username_is_retryable() {
        let h = Harness::new();
        seed_user(&h, "");
        let permission = h.store.insert(&permission("", Some("alice")));

        let err = PermissionReconciler::new(h.store.clone())
            .declare(FakeGateway::new().as_ref(), &permission)
            .await
            .unwrap_err();
        assert!(!err.is_permanent());
        assert_eq!(
            err.to_string(),
            "Reconciliation error: this User does not have an username set in its status"
        );
    }

    #[tokio::test]
    async fn test_delete_with_user_gone_is_noop() {
        let h = Harness::new();
        let gateway = FakeGateway::new();
        let permission = h.store.insert(&permission("", Some("alice")));

        PermissionReconciler::new(h.store.clone())
            .delete(gateway.as_ref(), &permission)
            .await
            .unwrap();
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_clears_permissions() {
        let h = Harness::new();
        let gateway = FakeGateway::new();
        seed_user(&h, "generated");
        let permission = h.store.insert(&permission("", Some("alice")));
        let strategy = PermissionReconciler::new(h.store.clone());

        strategy.delete(gateway.as_ref(), &permission).await.unwrap();
        assert_eq!(gateway.paths(Method::DELETE), vec!["permissions///generated"]);

        gateway.respond(Method::DELETE, 404);
        strategy.delete(gateway.as_ref(), &permission).await.unwrap();
    }

    #[test]
    fn test_referenced_user() {
        assert_eq!(referenced_user_of_permission(&permission("bob", None)), None);
        assert_eq!(
            referenced_user_of_permission(&permission("", Some("alice"))).as_deref(),
            Some("alice")
        );
    }
}
