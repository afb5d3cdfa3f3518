//! Shared helpers for the reconcile-loop tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use stratus_aws::prelude::*;

pub const SHORT: Outcome = Outcome::RequeueAfter(Duration::from_secs(5));
pub const POLL: Outcome = Outcome::RequeueAfter(Duration::from_secs(60));

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stratus_core=debug".parse().unwrap())
                .add_directive("stratus_aws=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

/// In-memory stores plus the typed handles tests poke at
pub struct Harness<K: ManagedResource> {
    pub stores: StoreSet,
    pub objects: Arc<MemoryStore<K>>,
    pub secrets: Arc<MemorySecretStore>,
    pub recorder: Arc<RecordingEventRecorder>,
}

impl<K: AwsResource> Harness<K> {
    pub fn new() -> Self {
        let stores = StoreSet::memory();
        let StoreSet::Memory(registry) = &stores else {
            unreachable!()
        };
        Self {
            objects: registry.memory_store::<K>(),
            secrets: registry.memory_secrets(),
            recorder: Arc::new(RecordingEventRecorder::new()),
            stores,
        }
    }

    pub fn reconciler(&self, connector: StaticConnector<K>) -> Reconciler<K> {
        Reconciler::new(self.stores.clone(), Arc::new(connector))
            .with_recorder(self.recorder.clone())
    }

    pub fn get(&self, name: &str) -> K {
        self.objects.snapshot(name).unwrap()
    }

    pub fn ready(&self, name: &str) -> Option<Condition> {
        get_condition(self.get(name).conditions(), TYPE_READY).cloned()
    }

    pub fn synced(&self, name: &str) -> Option<Condition> {
        get_condition(self.get(name).conditions(), TYPE_SYNCED).cloned()
    }

    /// Value of one key of a connection secret
    pub fn secret_value(&self, namespace: &str, name: &str, key: &str) -> Option<String> {
        let secret = self.secrets.snapshot(namespace, name)?;
        let bytes = secret.data?.remove(key)?;
        String::from_utf8(bytes.0).ok()
    }
}

pub fn connection_secret(name: &str) -> Option<SecretReference> {
    Some(SecretReference {
        name: name.to_string(),
        namespace: "stratus-system".to_string(),
    })
}
