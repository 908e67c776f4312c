//! Object store abstraction over the Kubernetes API.
//!
//! Reconcilers read and write resources through [`Store`] so the state
//! machines can run against the API server or an in-memory double. Writes
//! carry the object's `resourceVersion`; a stale version fails with
//! [`OperatorError::Conflict`].

use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{Api, DynamicObject, Patch, PatchParams, PostParams};
use kube::core::ApiResource;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Untyped access to namespaced objects.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch an object, `None` when it does not exist.
    async fn get_value(&self, resource: &ApiResource, namespace: &str, name: &str)
        -> Result<Option<Value>>;

    /// Create an object.
    async fn create_value(&self, resource: &ApiResource, namespace: &str, object: Value)
        -> Result<Value>;

    /// Replace metadata and spec of an existing object.
    async fn replace_value(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        object: Value,
    ) -> Result<Value>;

    /// Replace the status subresource of an existing object.
    async fn replace_status_value(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        object: Value,
    ) -> Result<Value>;
}

/// Fetch a typed object.
pub async fn get<K>(store: &dyn Store, namespace: &str, name: &str) -> Result<Option<K>>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let resource = ApiResource::erase::<K>(&());
    match store.get_value(&resource, namespace, name).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Create a typed object in `namespace`.
pub async fn create<K>(store: &dyn Store, namespace: &str, object: &K) -> Result<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let resource = ApiResource::erase::<K>(&());
    let value = serde_json::to_value(object)?;
    let created = store.create_value(&resource, namespace, value).await?;
    Ok(serde_json::from_value(created)?)
}

/// Replace a typed object; fails with a conflict if it changed since it was read.
pub async fn replace<K>(store: &dyn Store, namespace: &str, object: &K) -> Result<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let resource = ApiResource::erase::<K>(&());
    let name = object.name_any();
    let value = serde_json::to_value(object)?;
    let replaced = store.replace_value(&resource, namespace, &name, value).await?;
    Ok(serde_json::from_value(replaced)?)
}

/// Replace the status of a typed object; fails with a conflict if it changed since it was read.
pub async fn replace_status<K>(store: &dyn Store, namespace: &str, object: &K) -> Result<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let resource = ApiResource::erase::<K>(&());
    let name = object.name_any();
    let value = serde_json::to_value(object)?;
    let replaced = store
        .replace_status_value(&resource, namespace, &name, value)
        .await?;
    Ok(serde_json::from_value(replaced)?)
}

/// Outcome of [`create_or_update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Created,
    Updated,
    Unchanged,
}

/// Create `skeleton` after applying `mutate`, or apply `mutate` to the
/// existing object and replace it when that changed anything.
pub async fn create_or_update<K, F>(
    store: &dyn Store,
    namespace: &str,
    skeleton: &K,
    mutate: F,
) -> Result<Operation>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned,
    F: Fn(&mut K) -> Result<()>,
{
    let name = skeleton.name_any();
    match get::<K>(store, namespace, &name).await? {
        None => {
            let mut object = skeleton.clone();
            object.meta_mut().namespace = Some(namespace.to_string());
            mutate(&mut object)?;
            create(store, namespace, &object).await?;
            Ok(Operation::Created)
        }
        Some(mut existing) => {
            let before = serde_json::to_value(&existing)?;
            mutate(&mut existing)?;
            if serde_json::to_value(&existing)? == before {
                return Ok(Operation::Unchanged);
            }
            replace(store, namespace, &existing).await?;
            Ok(Operation::Updated)
        }
    }
}

/// Make `owner` the controller of `meta`.
///
/// Fails if a different controller already owns the object.
pub fn set_controller_reference(meta: &mut ObjectMeta, owner: OwnerReference) -> Result<()> {
    let references = meta.owner_references.get_or_insert_with(Vec::new);
    if let Some(other) = references
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != owner.uid)
    {
        return Err(OperatorError::InvalidState(format!(
            "object is already owned by another {} controller {}",
            other.kind, other.name
        )));
    }
    references.retain(|r| r.uid != owner.uid);
    references.push(owner);
    Ok(())
}

/// Controller owner reference pointing at `owner`.
pub fn controller_reference<K>(owner: &K) -> Result<OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    owner.controller_owner_ref(&()).ok_or_else(|| {
        OperatorError::InvalidState(format!("{} has no uid yet", owner.name_any()))
    })
}

/// Read `key` from a Secret as UTF-8, checking `data` then `stringData`.
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(key)) {
        return Some(String::from_utf8_lossy(&bytes.0).into_owned());
    }
    secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(key))
        .cloned()
}

/// [`Store`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }
}

#[async_trait]
impl Store for KubeStore {
    async fn get_value(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Value>> {
        let object = self.api(resource, namespace).get_opt(name).await?;
        object
            .map(|o| serde_json::to_value(o).map_err(OperatorError::from))
            .transpose()
    }

    async fn create_value(
        &self,
        resource: &ApiResource,
        namespace: &str,
        object: Value,
    ) -> Result<Value> {
        let object: DynamicObject = serde_json::from_value(object)?;
        let created = self
            .api(resource, namespace)
            .create(&PostParams::default(), &object)
            .await?;
        Ok(serde_json::to_value(created)?)
    }

    async fn replace_value(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        object: Value,
    ) -> Result<Value> {
        let object: DynamicObject = serde_json::from_value(object)?;
        let replaced = self
            .api(resource, namespace)
            .replace(name, &PostParams::default(), &object)
            .await?;
        Ok(serde_json::to_value(replaced)?)
    }

    async fn replace_status_value(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        object: Value,
    ) -> Result<Value> {
        // A merge patch carrying resourceVersion is rejected with 409 when stale.
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": object["metadata"]["resourceVersion"] },
            "status": object["status"],
        });
        let patched = self
            .api(resource, namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(serde_json::to_value(patched)?)
    }
}
