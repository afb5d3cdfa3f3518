//! Typed access to the declarative store
//!
//! [`Store`] is the only way the reconciler reads or writes managed
//! resources. [`KubeStore`] talks to the API server; the in-memory
//! implementation in [`crate::memory`] backs tests. Spec and metadata writes
//! are full replaces guarded by `resourceVersion`; status writes go through
//! the status subresource as a merge patch.

use crate::error::{ProviderError, Result};
use crate::memory::MemoryRegistry;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "stratus-provider";

/// Anything the store can hold
pub trait StoreObject:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> StoreObject for T where
    T: Resource<DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Read and write one kind of cluster-scoped object
#[async_trait]
pub trait Store<K: StoreObject>: Send + Sync {
    /// Fetch by name; `None` if it does not exist
    async fn get(&self, name: &str) -> Result<Option<K>>;

    /// Replace spec and metadata. Fails with `Conflict` on a stale resourceVersion.
    async fn update(&self, obj: &K) -> Result<K>;

    /// Write the status block
    async fn patch_status(&self, obj: &K) -> Result<K>;

    /// List objects carrying all the given labels
    async fn list(&self, labels: &BTreeMap<String, String>) -> Result<Vec<K>>;

    /// Stream of names whose objects changed
    fn watch(&self) -> BoxStream<'static, Result<String>>;
}

/// Store backed by the Kubernetes API server
pub struct KubeStore<K> {
    api: Api<K>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: StoreObject> KubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
            _kind: PhantomData,
        }
    }
}

/// The `status` value of an object, `null` if absent
pub fn status_of<K: Serialize>(obj: &K) -> Result<serde_json::Value> {
    let value = serde_json::to_value(obj)?;
    Ok(value
        .get("status")
        .cloned()
        .unwrap_or(serde_json::Value::Null))
}

/// Copy the `status` key of `from` into `into`, or drop it
pub fn with_status_of<K: StoreObject>(into: &K, from: &K) -> Result<K> {
    let mut value = serde_json::to_value(into)?;
    let status = serde_json::to_value(from)?.get("status").cloned();
    if let Some(map) = value.as_object_mut() {
        match status {
            Some(s) => {
                map.insert("status".to_string(), s);
            }
            None => {
                map.remove("status");
            }
        }
    }
    Ok(serde_json::from_value(value)?)
}

fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl<K: StoreObject> Store<K> for KubeStore<K> {
    async fn get(&self, name: &str) -> Result<Option<K>> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let name = obj.name_any();
        debug!(name = %name, kind = %K::kind(&()), "Replacing managed resource");
        Ok(self
            .api
            .replace(&name, &PostParams::default(), obj)
            .await?)
    }

    async fn patch_status(&self, obj: &K) -> Result<K> {
        let name = obj.name_any();
        let patch = serde_json::json!({ "status": status_of(obj)? });
        debug!(name = %name, kind = %K::kind(&()), "Patching managed resource status");
        Ok(self
            .api
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn list(&self, labels: &BTreeMap<String, String>) -> Result<Vec<K>> {
        let lp = ListParams::default().labels(&label_selector(labels));
        Ok(self.api.list(&lp).await?.items)
    }

    fn watch(&self) -> BoxStream<'static, Result<String>> {
        watcher(self.api.clone(), watcher::Config::default())
            .default_backoff()
            .touched_objects()
            .map(|res| {
                res.map(|obj| obj.name_any())
                    .map_err(|e| ProviderError::Transient(format!("watch failed: {e}")))
            })
            .boxed()
    }
}

/// Namespaced Kubernetes Secrets, used for credentials, inputs and
/// connection details
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    /// Create or update the secret and return the stored object
    async fn apply(&self, secret: &Secret) -> Result<Secret>;

    /// Delete the secret; deleting a missing secret is not an error
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Secret store backed by the Kubernetes API server
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn apply(&self, secret: &Secret) -> Result<Secret> {
        let namespace = secret.namespace().ok_or_else(|| {
            ProviderError::Internal("connection secret missing metadata.namespace".into())
        })?;
        let name = secret.metadata.name.as_deref().ok_or_else(|| {
            ProviderError::Internal("connection secret missing metadata.name".into())
        })?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);

        debug!(name = %name, namespace = %namespace, "Applying Secret");

        let patch_params = PatchParams::apply(FIELD_MANAGER).force();
        Ok(api
            .patch(name, &patch_params, &Patch::Apply(secret))
            .await?)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Hands out typed stores for any kind.
///
/// The reference resolver needs to read objects of kinds other than the one
/// being reconciled; `StoreSet` gives it a store for whatever target kind a
/// reference descriptor names.
#[derive(Clone)]
pub enum StoreSet {
    Kube(Client),
    Memory(Arc<MemoryRegistry>),
}

impl StoreSet {
    /// A fresh in-memory store set
    pub fn memory() -> Self {
        StoreSet::Memory(Arc::new(MemoryRegistry::default()))
    }

    pub fn store<K: StoreObject>(&self) -> Arc<dyn Store<K>> {
        match self {
            StoreSet::Kube(client) => Arc::new(KubeStore::<K>::new(client.clone())),
            StoreSet::Memory(registry) => registry.store::<K>(),
        }
    }

    pub fn secrets(&self) -> Arc<dyn SecretStore> {
        match self {
            StoreSet::Kube(client) => Arc::new(KubeSecretStore::new(client.clone())),
            StoreSet::Memory(registry) => registry.secrets(),
        }
    }
}
