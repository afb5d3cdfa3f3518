//! In-memory store implementations
//!
//! These mirror the API-server semantics the reconciler depends on:
//! resourceVersion checks on update, a status block that only
//! `patch_status` can change, deletion that waits for finalizers, and a watch
//! stream of changed names.

use crate::error::{ProviderError, Result};
use crate::store::{with_status_of, SecretStore, Store, StoreObject};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Resource, ResourceExt};
use parking_lot::{Mutex, RwLock};
use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// One in-memory store per kind, plus one for secrets
#[derive(Default)]
pub struct MemoryRegistry {
    stores: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    secrets: Arc<MemorySecretStore>,
}

impl MemoryRegistry {
    /// The concrete store for a kind, created on first use
    pub fn memory_store<K: StoreObject>(&self) -> Arc<MemoryStore<K>> {
        let entry = self
            .stores
            .entry(TypeId::of::<K>())
            .or_insert_with(|| Arc::new(MemoryStore::<K>::new()) as Arc<dyn Any + Send + Sync>)
            .clone();
        match entry.downcast::<MemoryStore<K>>() {
            Ok(store) => store,
            Err(_) => unreachable!("memory store registered under a foreign type id"),
        }
    }

    pub fn store<K: StoreObject>(&self) -> Arc<dyn Store<K>> {
        self.memory_store::<K>()
    }

    pub fn memory_secrets(&self) -> Arc<MemorySecretStore> {
        self.secrets.clone()
    }

    pub fn secrets(&self) -> Arc<dyn SecretStore> {
        self.secrets.clone()
    }
}

/// In-memory store for one kind
pub struct MemoryStore<K> {
    objects: RwLock<BTreeMap<String, K>>,
    version: AtomicU64,
    events: broadcast::Sender<String>,
    injected_conflicts: Mutex<usize>,
    status_writes: AtomicU64,
    spec_writes: AtomicU64,
}

impl<K: StoreObject> Default for MemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: StoreObject> MemoryStore<K> {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            version: AtomicU64::new(0),
            events,
            injected_conflicts: Mutex::new(0),
            status_writes: AtomicU64::new(0),
            spec_writes: AtomicU64::new(0),
        }
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn notify(&self, name: &str) {
        // No receivers is fine
        let _ = self.events.send(name.to_string());
    }

    /// Insert a new object as a user would, assigning uid and resourceVersion
    pub fn create(&self, mut obj: K) -> Result<K> {
        let name = obj.name_any();
        let mut objects = self.objects.write();
        if objects.contains_key(&name) {
            return Err(ProviderError::Conflict(format!("{name} already exists")));
        }
        let meta = obj.meta_mut();
        meta.uid.get_or_insert_with(|| format!("uid-{name}"));
        meta.generation = Some(1);
        meta.creation_timestamp = Some(Time(Utc::now()));
        meta.resource_version = Some(self.next_version());
        objects.insert(name.clone(), obj.clone());
        drop(objects);
        self.notify(&name);
        Ok(obj)
    }

    /// Replace the spec as a user would, bumping the generation
    pub fn edit(&self, name: &str, f: impl FnOnce(&mut K)) -> Result<K> {
        let mut objects = self.objects.write();
        let obj = objects
            .get_mut(name)
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))?;
        f(obj);
        let generation = obj.meta().generation.unwrap_or(0) + 1;
        obj.meta_mut().generation = Some(generation);
        obj.meta_mut().resource_version = Some(self.next_version());
        let updated = obj.clone();
        drop(objects);
        self.notify(name);
        Ok(updated)
    }

    /// Request deletion; the object stays until its finalizers are gone
    pub fn delete(&self, name: &str) -> Result<()> {
        let mut objects = self.objects.write();
        let Some(obj) = objects.get_mut(name) else {
            return Err(ProviderError::NotFound(name.to_string()));
        };
        if obj.finalizers().is_empty() {
            objects.remove(name);
        } else {
            obj.meta_mut().deletion_timestamp = Some(Time(Utc::now()));
            obj.meta_mut().resource_version = Some(self.next_version());
        }
        drop(objects);
        self.notify(name);
        Ok(())
    }

    /// Current object without going through the async trait
    pub fn snapshot(&self, name: &str) -> Option<K> {
        self.objects.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fail the next `n` updates with a conflict
    pub fn inject_conflicts(&self, n: usize) {
        *self.injected_conflicts.lock() = n;
    }

    pub fn spec_writes(&self) -> u64 {
        self.spec_writes.load(Ordering::SeqCst)
    }

    pub fn status_writes(&self) -> u64 {
        self.status_writes.load(Ordering::SeqCst)
    }

    fn take_injected_conflict(&self) -> bool {
        let mut remaining = self.injected_conflicts.lock();
        if *remaining > 0 {
            *remaining -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl<K: StoreObject> Store<K> for MemoryStore<K> {
    async fn get(&self, name: &str) -> Result<Option<K>> {
        Ok(self.snapshot(name))
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let name = obj.name_any();
        if self.take_injected_conflict() {
            return Err(ProviderError::Conflict(format!(
                "the object has been modified: {name}"
            )));
        }

        let mut objects = self.objects.write();
        let existing = objects
            .get(&name)
            .ok_or_else(|| ProviderError::NotFound(name.clone()))?;
        if existing.resource_version() != obj.resource_version() {
            return Err(ProviderError::Conflict(format!(
                "the object has been modified: {name}"
            )));
        }

        let mut updated = with_status_of(obj, existing)?;
        // Immutable fields
        updated.meta_mut().uid = existing.meta().uid.clone();
        updated.meta_mut().deletion_timestamp = existing.meta().deletion_timestamp.clone();
        updated.meta_mut().generation = existing.meta().generation;
        updated.meta_mut().resource_version = Some(self.next_version());

        let finalized = updated.meta().deletion_timestamp.is_some() && updated.finalizers().is_empty();
        if finalized {
            objects.remove(&name);
        } else {
            objects.insert(name.clone(), updated.clone());
        }
        drop(objects);

        self.spec_writes.fetch_add(1, Ordering::SeqCst);
        self.notify(&name);
        Ok(updated)
    }

    async fn patch_status(&self, obj: &K) -> Result<K> {
        let name = obj.name_any();
        let mut objects = self.objects.write();
        let existing = objects
            .get(&name)
            .ok_or_else(|| ProviderError::NotFound(name.clone()))?;

        let mut updated = with_status_of(existing, obj)?;
        updated.meta_mut().resource_version = Some(self.next_version());
        objects.insert(name.clone(), updated.clone());
        drop(objects);

        self.status_writes.fetch_add(1, Ordering::SeqCst);
        self.notify(&name);
        Ok(updated)
    }

    async fn list(&self, labels: &BTreeMap<String, String>) -> Result<Vec<K>> {
        Ok(self
            .objects
            .read()
            .values()
            .filter(|obj| {
                let obj_labels = obj.labels();
                labels
                    .iter()
                    .all(|(k, v)| obj_labels.get(k).is_some_and(|l| l == v))
            })
            .cloned()
            .collect())
    }

    fn watch(&self) -> BoxStream<'static, Result<String>> {
        let rx = self.events.subscribe();
        let initial: Vec<Result<String>> = self.objects.read().keys().cloned().map(Ok).collect();
        let live = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(name) => return Some((Ok(name), rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        futures::stream::iter(initial).chain(live).boxed()
    }
}

/// In-memory Kubernetes Secrets
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: DashMap<(String, String), Secret>,
    version: AtomicU64,
    applies: AtomicU64,
}

impl MemorySecretStore {
    /// Insert or replace a secret with string data
    pub fn put(&self, namespace: &str, name: &str, data: BTreeMap<String, String>) {
        let mut secret = Secret::default();
        secret.metadata.name = Some(name.to_string());
        secret.metadata.namespace = Some(namespace.to_string());
        secret.metadata.resource_version =
            Some((self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string());
        secret.data = Some(
            data.into_iter()
                .map(|(k, v)| (k, k8s_openapi::ByteString(v.into_bytes())))
                .collect(),
        );
        self.secrets
            .insert((namespace.to_string(), name.to_string()), secret);
    }

    pub fn snapshot(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets
            .get(&(namespace.to_string(), name.to_string()))
            .map(|s| s.clone())
    }

    /// Number of apply calls served
    pub fn applies(&self) -> u64 {
        self.applies.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self.snapshot(namespace, name))
    }

    async fn apply(&self, secret: &Secret) -> Result<Secret> {
        let namespace = secret.metadata.namespace.clone().ok_or_else(|| {
            ProviderError::Internal("connection secret missing metadata.namespace".into())
        })?;
        let name = secret.metadata.name.clone().ok_or_else(|| {
            ProviderError::Internal("connection secret missing metadata.name".into())
        })?;
        let mut stored = secret.clone();
        stored.metadata.resource_version =
            Some((self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string());
        self.secrets.insert((namespace, name), stored.clone());
        self.applies.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        self.secrets
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::testing::{widget, Widget, WidgetStatus};
    use crate::resource::FINALIZER_NAME;

    #[tokio::test]
    async fn test_update_conflict_on_stale_version() {
        let store = MemoryStore::<Widget>::new();
        let created = store.create(widget("a")).unwrap();

        let mut first = created.clone();
        first.spec.for_provider.size = Some(1);
        store.update(&first).await.unwrap();

        let mut stale = created;
        stale.spec.for_provider.size = Some(2);
        let err = store.update(&stale).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_update_does_not_touch_status() {
        let store = MemoryStore::<Widget>::new();
        let mut w = store.create(widget("a")).unwrap();
        w.status = Some(WidgetStatus::default());
        w.status.as_mut().unwrap().at_provider.arn = Some("arn:1".into());
        let w = store.patch_status(&w).await.unwrap();

        let mut edited = w.clone();
        edited.status = None;
        edited.spec.for_provider.color = Some("red".into());
        let updated = store.update(&edited).await.unwrap();

        assert_eq!(
            updated.status.unwrap().at_provider.arn.as_deref(),
            Some("arn:1")
        );
        assert_eq!(updated.spec.for_provider.color.as_deref(), Some("red"));
    }

    #[tokio::test]
    async fn test_patch_status_ignores_spec() {
        let store = MemoryStore::<Widget>::new();
        let mut w = store.create(widget("a")).unwrap();
        w.spec.for_provider.size = Some(99);
        w.status = Some(WidgetStatus::default());
        let patched = store.patch_status(&w).await.unwrap();
        assert_eq!(patched.spec.for_provider.size, None);
        assert!(patched.status.is_some());
        assert_eq!(store.status_writes(), 1);
    }

    #[tokio::test]
    async fn test_delete_waits_for_finalizer() {
        let store = MemoryStore::<Widget>::new();
        let mut w = widget("a");
        w.metadata.finalizers = Some(vec![FINALIZER_NAME.to_string()]);
        store.create(w).unwrap();

        store.delete("a").unwrap();
        let pending = store.get("a").await.unwrap().unwrap();
        assert!(pending.metadata.deletion_timestamp.is_some());

        let mut cleared = pending;
        cleared.metadata.finalizers = Some(vec![]);
        store.update(&cleared).await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_conflicts() {
        let store = MemoryStore::<Widget>::new();
        let w = store.create(widget("a")).unwrap();
        store.inject_conflicts(1);
        assert!(store.update(&w).await.unwrap_err().is_conflict());
        assert!(store.update(&w).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_by_labels() {
        let store = MemoryStore::<Widget>::new();
        let mut a = widget("a");
        a.metadata.labels = Some(BTreeMap::from([("team".into(), "x".into())]));
        store.create(a).unwrap();
        store.create(widget("b")).unwrap();

        let labels = BTreeMap::from([("team".to_string(), "x".to_string())]);
        let found = store.list(&labels).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name_any(), "a");
        assert_eq!(store.list(&BTreeMap::new()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_watch_replays_then_follows() {
        let store = MemoryStore::<Widget>::new();
        store.create(widget("a")).unwrap();
        let mut stream = store.watch();
        store.create(widget("b")).unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), "a");
        assert_eq!(stream.next().await.unwrap().unwrap(), "b");
    }

    #[tokio::test]
    async fn test_registry_returns_same_store() {
        let registry = MemoryRegistry::default();
        registry.memory_store::<Widget>().create(widget("a")).unwrap();
        let store = registry.store::<Widget>();
        assert!(store.get("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_secret_store() {
        let secrets = MemorySecretStore::default();
        secrets.put(
            "default",
            "creds",
            BTreeMap::from([("key".to_string(), "value".to_string())]),
        );
        let s = secrets.get("default", "creds").await.unwrap().unwrap();
        assert_eq!(s.data.unwrap()["key"].0, b"value".to_vec());

        secrets.delete("default", "creds").await.unwrap();
        assert!(secrets.get("default", "creds").await.unwrap().is_none());
    }
}
