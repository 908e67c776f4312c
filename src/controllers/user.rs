//! User strategy
//!
//! Every User owns a credentials Secret named `<user>-user-credentials`.
//! The Secret is created once, either from an imported Secret or from
//! random values, and its username is recorded in the User status. The
//! broker user is then declared from whatever the Secret holds.

use super::{update_status, ReconcileFunc};
use crate::crd::{LocalObjectReference, User};
use crate::error::{OperatorError, Result};
use crate::rabbitmq::settings::{
    random_encoded_string, salted_password_hash, UserSettings, HASHING_ALGORITHM_SHA512,
};
use crate::rabbitmq::{validate_delete_response, validate_response, Gateway};
use crate::retry::retry_on_conflict;
use crate::store::{self, Store};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

/// Length in bytes of generated usernames and passwords before encoding.
const GENERATED_CREDENTIAL_BYTES: usize = 24;

pub struct UserReconciler {
    store: Arc<dyn Store>,
}

impl UserReconciler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Username and optional password from an imported Secret.
    async fn import_credentials(&self, secret_name: &str, namespace: &str) -> Result<(String, Option<String>)> {
        info!(secret = %secret_name, namespace = %namespace, "Importing user credentials from provided Secret");
        let secret = store::get::<Secret>(self.store.as_ref(), namespace, secret_name)
            .await?
            .ok_or_else(|| {
                OperatorError::NotFound(format!(
                    "could not find password secret {secret_name} in namespace {namespace}"
                ))
            })?;
        let username = store::secret_value(&secret, "username").ok_or_else(|| {
            OperatorError::Reconciliation(format!(
                "could not find username key in credentials secret: {secret_name}"
            ))
        })?;
        let password = store::secret_value(&secret, "password");
        info!(secret = %secret_name, username = %username, "Retrieved credentials from Secret");
        Ok((username, password))
    }

    async fn generate_credentials(&self, user: &User) -> Result<(String, String)> {
        let (username, password) = match &user.spec.import_credentials_secret {
            Some(import) => {
                info!(user = %user.name_any(), secret = %import.name, "An import secret was provided in the user spec");
                self.import_credentials(&import.name, &user.namespace().unwrap_or_default())
                    .await?
            }
            None => (random_encoded_string(GENERATED_CREDENTIAL_BYTES), None),
        };
        let password = password.unwrap_or_else(|| random_encoded_string(GENERATED_CREDENTIAL_BYTES));
        Ok((username, password))
    }

    /// Create the credentials Secret unless it exists, making the User its
    /// controller. Returns the username the Secret holds.
    async fn declare_credentials(&self, user: &User) -> Result<String> {
        let (username, password) = self.generate_credentials(user).await?;
        info!(user = %user.name_any(), username = %username, "Credentials generated for User");

        let namespace = user.namespace().unwrap_or_default();
        let skeleton = Secret {
            metadata: ObjectMeta {
                name: Some(user.credentials_secret_name()),
                namespace: Some(namespace.clone()),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            data: Some(BTreeMap::from([
                ("username".to_string(), ByteString(username.into_bytes())),
                ("password".to_string(), ByteString(password.into_bytes())),
            ])),
            ..Default::default()
        };
        let mut owner = store::controller_reference(user)?;
        // OpenShift refuses blockOwnerDeletion without delete permission on the owner
        owner.block_owner_deletion = Some(false);

        let store = self.store.as_ref();
        let (skeleton, owner, namespace) = (&skeleton, &owner, &namespace);
        let operation = retry_on_conflict(|| async move {
            store::create_or_update(store, namespace, skeleton, |secret| {
                store::set_controller_reference(&mut secret.metadata, owner.clone())
            })
            .await
        })
        .await
        .map_err(|e| {
            error!(user = %user.name_any(), "failed to create/update credentials secret: {}", e);
            e
        })?;
        info!(secret = %skeleton.name_any(), namespace = %namespace, operation = ?operation, "Successfully declared credentials secret");

        let secret = self.credentials_secret(user, &skeleton.name_any()).await?;
        store::secret_value(&secret, "username").ok_or_else(|| {
            OperatorError::Reconciliation(format!(
                "could not find username in credentials secret {}",
                skeleton.name_any()
            ))
        })
    }

    async fn credentials_secret(&self, user: &User, secret_name: &str) -> Result<Secret> {
        store::get::<Secret>(self.store.as_ref(), &user.namespace().unwrap_or_default(), secret_name)
            .await?
            .ok_or_else(|| {
                OperatorError::NotFound(format!(
                    "failed to retrieve user credentials secret {secret_name} of user {}",
                    user.name_any()
                ))
            })
    }

    /// Make sure the credentials Secret exists and the status names it.
    /// Returns the name of the Secret.
    async fn ensure_credentials(&self, user: &User) -> Result<String> {
        let status = user.status.clone().unwrap_or_default();
        if let Some(credentials) = &status.credentials {
            if !status.username.is_empty() {
                return Ok(credentials.name.clone());
            }
        }

        let username = match &status.credentials {
            // Resources created before the username was recorded in status
            Some(credentials) => {
                let secret = self.credentials_secret(user, &credentials.name).await?;
                store::secret_value(&secret, "username").unwrap_or_default()
            }
            None => {
                info!(user = %user.name_any(), "User does not yet have a Credentials Secret; generating");
                self.declare_credentials(user).await?
            }
        };

        let secret_name = status
            .credentials
            .map(|c| c.name)
            .unwrap_or_else(|| user.credentials_secret_name());
        let reference = LocalObjectReference::new(secret_name.clone());
        update_status::<User, _>(
            self.store.as_ref(),
            &user.namespace().unwrap_or_default(),
            &user.name_any(),
            |latest| {
                let status = latest.status.get_or_insert_with(Default::default);
                status.credentials = Some(reference.clone());
                status.username = username.clone();
            },
        )
        .await?;
        info!(user = %user.name_any(), secret = %secret_name, "Successfully updated secret status credentials");
        Ok(secret_name)
    }
}

#[async_trait]
impl ReconcileFunc<User> for UserReconciler {
    async fn declare(&self, gateway: &dyn Gateway, user: &User) -> Result<()> {
        let secret_name = self.ensure_credentials(user).await?;
        let secret = self.credentials_secret(user, &secret_name).await?;
        let missing = |field: &str| {
            OperatorError::Reconciliation(format!("could not find {field} in credentials secret {secret_name}"))
        };
        let username = store::secret_value(&secret, "username").ok_or_else(|| missing("username"))?;
        let password = store::secret_value(&secret, "password").ok_or_else(|| missing("password"))?;

        let settings = UserSettings {
            name: username,
            password_hash: salted_password_hash(&password),
            hashing_algorithm: HASHING_ALGORITHM_SHA512.to_string(),
            tags: user
                .spec
                .tags
                .iter()
                .map(|t| t.as_str())
                .collect::<Vec<_>>()
                .join(","),
        };
        info!(user = %user.name_any(), username = %settings.name, "Generated user settings");
        validate_response(gateway.put_user(&settings.name, &settings).await?)
    }

    async fn delete(&self, gateway: &dyn Gateway, user: &User) -> Result<()> {
        let username = user.status_username();
        if username.is_empty() {
            info!(user = %user.name_any(), "User has no username in status; nothing to delete");
            return Ok(());
        }
        validate_delete_response(gateway.delete_user(username).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::testing::{cluster_reference, secret, Harness, NAMESPACE};
    use crate::crd::{UserSpec, UserStatus, UserTag};
    use crate::rabbitmq::testing::FakeGateway;
    use reqwest::Method;

    fn user(h: &Harness, import: Option<&str>) -> User {
        let mut user = User::new(
            "alice",
            UserSpec {
                tags: vec![UserTag::Management, UserTag::Administrator],
                rabbitmq_cluster_reference: cluster_reference(),
                import_credentials_secret: import.map(LocalObjectReference::new),
            },
        );
        user.metadata.namespace = Some(NAMESPACE.to_string());
        h.store.insert(&user)
    }

    fn strategy(h: &Harness) -> UserReconciler {
        UserReconciler::new(h.store.clone())
    }

    fn stored_secret(h: &Harness) -> Secret {
        h.store.fetch(NAMESPACE, "alice-user-credentials").unwrap()
    }

    #[tokio::test]
    async fn test_generates_credentials_secret_and_status() {
        let h = Harness::new();
        let gateway = FakeGateway::new();
        let user = user(&h, None);

        strategy(&h).declare(gateway.as_ref(), &user).await.unwrap();

        let secret = stored_secret(&h);
        let username = store::secret_value(&secret, "username").unwrap();
        assert_eq!(username.len(), 32);
        assert_eq!(store::secret_value(&secret, "password").unwrap().len(), 32);
        assert_eq!(secret.type_.as_deref(), Some("Opaque"));
        let owner = &secret.metadata.owner_references.unwrap()[0];
        assert_eq!(owner.kind, "User");
        assert_eq!(owner.controller, Some(true));
        assert_eq!(owner.block_owner_deletion, Some(false));

        let stored: User = h.store.fetch(NAMESPACE, "alice").unwrap();
        let status = stored.status.unwrap();
        assert_eq!(status.username, username);
        assert_eq!(status.credentials.unwrap().name, "alice-user-credentials");

        let call = &gateway.calls()[0];
        assert_eq!(call.method, "PUT");
        assert_eq!(call.path, format!("users/{username}"));
        let body = call.body.as_ref().unwrap();
        assert_eq!(body["tags"], "management,administrator");
        assert_eq!(body["hashing_algorithm"], HASHING_ALGORITHM_SHA512);
        assert!(body.get("name").is_none());
    }

    #[tokio::test]
    async fn test_imports_credentials() {
        let h = Harness::new();
        h.store.insert(&secret("imported", &[("username", "alice"), ("password", "s3cret")]));
        let gateway = FakeGateway::new();
        let user = user(&h, Some("imported"));

        strategy(&h).declare(gateway.as_ref(), &user).await.unwrap();

        let secret = stored_secret(&h);
        assert_eq!(store::secret_value(&secret, "username").as_deref(), Some("alice"));
        assert_eq!(store::secret_value(&secret, "password").as_deref(), Some("s3cret"));
        assert_eq!(gateway.paths(Method::PUT), vec!["users/alice"]);
    }

    #[tokio::test]
    async fn test_import_without_password_generates_one() {
        let h = Harness::new();
        h.store.insert(&secret("imported", &[("username", "alice")]));
        let user = user(&h, Some("imported"));

        strategy(&h).declare(FakeGateway::new().as_ref(), &user).await.unwrap();

        let secret = stored_secret(&h);
        assert_eq!(store::secret_value(&secret, "password").unwrap().len(), 32);
    }

    #[tokio::test]
    async fn test_import_secret_without_username_fails() {
        let h = Harness::new();
        h.store.insert(&secret("imported", &[("password", "s3cret")]));
        let gateway = FakeGateway::new();
        let user = user(&h, Some("imported"));

        let err = strategy(&h).declare(gateway.as_ref(), &user).await.unwrap_err();
        assert!(err.to_string().contains("could not find username key"));
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_existing_secret_data_is_kept() {
        let h = Harness::new();
        h.store.insert(&secret(
            "alice-user-credentials",
            &[("username", "kept"), ("password", "pw")],
        ));
        let gateway = FakeGateway::new();
        let user = user(&h, None);

        strategy(&h).declare(gateway.as_ref(), &user).await.unwrap();

        let stored: User = h.store.fetch(NAMESPACE, "alice").unwrap();
        assert_eq!(stored.status_username(), "kept");
        assert_eq!(gateway.paths(Method::PUT), vec!["users/kept"]);
    }

    #[tokio::test]
    async fn test_migrates_username_into_status() {
        let h = Harness::new();
        h.store.insert(&secret(
            "alice-user-credentials",
            &[("username", "legacy"), ("password", "pw")],
        ));
        let mut user = user(&h, None);
        user.status = Some(UserStatus {
            credentials: Some(LocalObjectReference::new("alice-user-credentials")),
            ..Default::default()
        });
        store::replace_status(h.store.as_ref(), NAMESPACE, &user).await.unwrap();
        let user: User = h.store.fetch(NAMESPACE, "alice").unwrap();
        let gateway = FakeGateway::new();

        strategy(&h).declare(gateway.as_ref(), &user).await.unwrap();

        let stored: User = h.store.fetch(NAMESPACE, "alice").unwrap();
        assert_eq!(stored.status_username(), "legacy");
        assert_eq!(gateway.paths(Method::PUT), vec!["users/legacy"]);
    }

    #[tokio::test]
    async fn test_delete_uses_status_username() {
        let h = Harness::new();
        let gateway = FakeGateway::new();
        let mut user = user(&h, None);

        strategy(&h).delete(gateway.as_ref(), &user).await.unwrap();
        assert!(gateway.calls().is_empty());

        user.status = Some(UserStatus {
            username: "alice".to_string(),
            ..Default::default()
        });
        strategy(&h).delete(gateway.as_ref(), &user).await.unwrap();
        assert_eq!(gateway.paths(Method::DELETE), vec!["users/alice"]);
    }
}
