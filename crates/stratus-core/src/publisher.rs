//! Connection detail publishing
//!
//! Endpoints, ports, credentials and tokens produced by an external object are
//! written to the Secret named by `spec.writeConnectionSecretToRef`. Writes
//! merge into existing keys and are skipped when nothing changed.

use crate::error::{ProviderError, Result, Stage, StageExt};
use crate::resource::{ManagedResource, SecretReference};
use crate::store::SecretStore;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use rand::distr::{Alphanumeric, SampleString};
use secrecy::SecretString;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Key/value pairs written into the connection Secret
pub type ConnectionDetails = BTreeMap<String, Vec<u8>>;

/// Well-known connection detail keys
pub mod keys {
    pub const ENDPOINT: &str = "endpoint";
    pub const PORT: &str = "port";
    pub const USERNAME: &str = "username";
    pub const PASSWORD: &str = "password";
    pub const URL: &str = "url";
    pub const CLI_TOKEN: &str = "cliToken";
    pub const WEB_TOKEN: &str = "webToken";
    pub const WEB_SERVER_URL: &str = "webServerURL";
}

/// Insert a string value, skipping empty ones
pub fn insert_detail(details: &mut ConnectionDetails, key: &str, value: impl AsRef<str>) {
    let value = value.as_ref();
    if !value.is_empty() {
        details.insert(key.to_string(), value.as_bytes().to_vec());
    }
}

/// Random alphanumeric password
pub fn generate_password(len: usize) -> SecretString {
    SecretString::from(Alphanumeric.sample_string(&mut rand::rng(), len))
}

/// Publishes and removes connection details for a managed resource
#[async_trait]
pub trait ConnectionPublisher<K>: Send + Sync {
    /// Returns true if anything was written
    async fn publish(&self, obj: &K, details: &ConnectionDetails) -> Result<bool>;

    async fn unpublish(&self, obj: &K) -> Result<()>;
}

/// Writes connection details to a Kubernetes Secret owned by the resource
pub struct SecretPublisher {
    secrets: Arc<dyn SecretStore>,
    default_namespace: String,
}

/// Namespace for connection secrets whose reference leaves it empty
pub const DEFAULT_SECRET_NAMESPACE: &str = "stratus-system";

impl SecretPublisher {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            secrets,
            default_namespace: DEFAULT_SECRET_NAMESPACE.to_string(),
        }
    }

    pub fn with_default_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.default_namespace = namespace.into();
        self
    }

    fn namespace<'a>(&'a self, target: &'a SecretReference) -> &'a str {
        if target.namespace.is_empty() {
            &self.default_namespace
        } else {
            &target.namespace
        }
    }
}

fn merged(existing: Option<&Secret>, details: &ConnectionDetails) -> BTreeMap<String, ByteString> {
    let mut data = existing
        .and_then(|s| s.data.clone())
        .unwrap_or_default();
    for (k, v) in details {
        data.insert(k.clone(), ByteString(v.clone()));
    }
    data
}

#[async_trait]
impl<K: ManagedResource> ConnectionPublisher<K> for SecretPublisher {
    async fn publish(&self, obj: &K, details: &ConnectionDetails) -> Result<bool> {
        let Some(target) = obj.connection_secret_ref() else {
            return Ok(false);
        };
        if details.is_empty() {
            return Ok(false);
        }

        let namespace = self.namespace(target);
        let existing = self
            .secrets
            .get(namespace, &target.name)
            .await
            .stage(Stage::PublishConnection)?;
        let data = merged(existing.as_ref(), details);
        if existing.as_ref().and_then(|s| s.data.as_ref()) == Some(&data) {
            return Ok(false);
        }

        let owner = obj.controller_owner_ref(&()).ok_or_else(|| {
            ProviderError::Internal(format!("{} has no uid", obj.name_any()))
                .at(Stage::PublishConnection)
        })?;
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(target.name.clone()),
                namespace: Some(namespace.to_string()),
                owner_references: Some(vec![owner]),
                ..Default::default()
            },
            type_: Some("connection.stratus.dev/v1alpha1".to_string()),
            data: Some(data),
            ..Default::default()
        };
        self.secrets
            .apply(&secret)
            .await
            .stage(Stage::PublishConnection)?;
        debug!(
            resource = %obj.name_any(),
            secret = %target.name,
            namespace = %namespace,
            keys = details.len(),
            "Published connection details"
        );
        Ok(true)
    }

    async fn unpublish(&self, obj: &K) -> Result<()> {
        let Some(target) = obj.connection_secret_ref() else {
            return Ok(());
        };
        self.secrets
            .delete(self.namespace(target), &target.name)
            .await
            .stage(Stage::UnpublishConnection)
    }
}

/// Runs several publishers in order
pub struct PublisherChain<K> {
    publishers: Vec<Box<dyn ConnectionPublisher<K>>>,
}

impl<K> PublisherChain<K> {
    pub fn new(publishers: Vec<Box<dyn ConnectionPublisher<K>>>) -> Self {
        Self { publishers }
    }
}

#[async_trait]
impl<K: Send + Sync> ConnectionPublisher<K> for PublisherChain<K> {
    async fn publish(&self, obj: &K, details: &ConnectionDetails) -> Result<bool> {
        let mut wrote = false;
        for p in &self.publishers {
            wrote |= p.publish(obj, details).await?;
        }
        Ok(wrote)
    }

    async fn unpublish(&self, obj: &K) -> Result<()> {
        for p in &self.publishers {
            p.unpublish(obj).await?;
        }
        Ok(())
    }
}
