//! Secrets Manager reconcile-loop tests
//!
//! The secret string is read from a Kubernetes Secret; rotating that value
//! must roll a new version in Secrets Manager.
//!
//! Run with: cargo test -p stratus-aws --test secretsmanager -- --nocapture

mod common;

use anyhow::Result;
use async_trait::async_trait;
use common::*;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;
use std::sync::Arc;
use stratus_aws::prelude::*;
use stratus_aws::secretsmanager::{
    SecretDescription, SecretHooks, SecretInput, SecretParameters, SecretSpec, SecretsManagerApi,
};
use tracing::info;

#[derive(Debug, Clone)]
struct StoredSecret {
    description: SecretDescription,
    value: Option<String>,
}

/// Secrets Manager keyed by secret name
#[derive(Default)]
struct FakeSecretsManager {
    secrets: Mutex<BTreeMap<String, StoredSecret>>,
    tokens: Mutex<Vec<String>>,
    updates: Mutex<Vec<(Option<String>, Option<String>)>>,
    deletions: Mutex<Vec<(String, Option<i64>)>>,
}

impl FakeSecretsManager {
    fn stored(&self, id: &str) -> stratus_core::error::Result<StoredSecret> {
        self.secrets
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("secret {id}")))
    }
}

#[async_trait]
impl SecretsManagerApi for FakeSecretsManager {
    async fn describe_secret(&self, id: &str) -> stratus_core::error::Result<SecretDescription> {
        Ok(self.stored(id)?.description)
    }

    async fn get_secret_value(&self, id: &str) -> stratus_core::error::Result<Option<SecretString>> {
        Ok(self.stored(id)?.value.map(SecretString::from))
    }

    async fn create_secret(
        &self,
        name: &str,
        input: &SecretInput,
        tags: &BTreeMap<String, String>,
        client_request_token: &str,
    ) -> stratus_core::error::Result<String> {
        self.tokens.lock().push(client_request_token.to_string());
        let arn = format!("arn:aws:secretsmanager:us-east-1:123456789012:secret:{name}-AbCdEf");
        self.secrets.lock().insert(
            name.to_string(),
            StoredSecret {
                description: SecretDescription {
                    arn: arn.clone(),
                    name: name.to_string(),
                    description: input.description.clone(),
                    kms_key_id: Some("aws/secretsmanager".into()),
                    tags: tags.clone(),
                    ..Default::default()
                },
                value: input
                    .secret_string
                    .as_ref()
                    .map(|s| s.expose_secret().to_string()),
            },
        );
        Ok(arn)
    }

    async fn update_secret(&self, id: &str, input: &SecretInput) -> stratus_core::error::Result<()> {
        let value = input
            .secret_string
            .as_ref()
            .map(|s| s.expose_secret().to_string());
        self.updates
            .lock()
            .push((input.description.clone(), value.clone()));
        let mut secrets = self.secrets.lock();
        let stored = secrets
            .get_mut(id)
            .ok_or_else(|| ProviderError::NotFound(format!("secret {id}")))?;
        if let Some(description) = &input.description {
            stored.description.description = Some(description.clone());
        }
        if value.is_some() {
            stored.value = value;
        }
        Ok(())
    }

    async fn tag_resource(
        &self,
        _id: &str,
        _tags: &BTreeMap<String, String>,
    ) -> stratus_core::error::Result<()> {
        Ok(())
    }

    async fn untag_resource(&self, _id: &str, _keys: &[String]) -> stratus_core::error::Result<()> {
        Ok(())
    }

    async fn delete_secret(
        &self,
        id: &str,
        recovery_window_in_days: Option<i64>,
        _force_delete_without_recovery: Option<bool>,
    ) -> stratus_core::error::Result<()> {
        self.deletions
            .lock()
            .push((id.to_string(), recovery_window_in_days));
        if let Some(stored) = self.secrets.lock().get_mut(id) {
            stored.description.deleted = true;
        }
        Ok(())
    }
}

fn secret(name: &str) -> Secret {
    Secret::new(
        name,
        SecretSpec {
            for_provider: SecretParameters {
                region: "us-east-1".into(),
                description: Some("database password".into()),
                string_secret_ref: Some(SecretKeySelector {
                    name: "db-creds".into(),
                    namespace: "apps".into(),
                    key: "password".into(),
                }),
                recovery_window_in_days: Some(7),
                ..Default::default()
            },
            resource: ResourceSpec {
                write_connection_secret_to_ref: connection_secret(&format!("{name}-conn")),
                ..Default::default()
            },
        },
    )
}

fn setup(api: Arc<FakeSecretsManager>) -> (Harness<Secret>, Reconciler<Secret>) {
    let harness = Harness::<Secret>::new();
    let stores = harness.stores.clone();
    let connector = StaticConnector::new(move || {
        Box::new(HookedClient::new(SecretHooks::new(api.clone(), stores.clone())))
            as Box<dyn ExternalClient<Secret>>
    });
    let reconciler = harness.reconciler(connector);
    (harness, reconciler)
}

fn source_value(harness: &Harness<Secret>, value: &str) {
    harness.secrets.put(
        "apps",
        "db-creds",
        BTreeMap::from([("password".to_string(), value.to_string())]),
    );
}

/// Rotating the source value updates only the secret string
#[tokio::test]
async fn test_secret_value_rotation() -> Result<()> {
    init_tracing();

    let api = Arc::new(FakeSecretsManager::default());
    let (harness, reconciler) = setup(api.clone());
    source_value(&harness, "v1");
    harness.objects.create(secret("db-password"))?;

    assert_eq!(reconciler.reconcile("db-password").await, SHORT);
    assert_eq!(api.tokens.lock().clone(), vec!["uid-db-password".to_string()]);
    assert_eq!(
        api.stored("db-password")?.value.as_deref(),
        Some("v1")
    );
    assert!(harness
        .secret_value("stratus-system", "db-password-conn", "arn")
        .is_some_and(|arn| arn.ends_with(":secret:db-password-AbCdEf")));

    assert_eq!(reconciler.reconcile("db-password").await, POLL);
    assert!(api.updates.lock().is_empty());
    // KMS key reported by AWS was adopted into the spec
    assert_eq!(
        harness.get("db-password").spec.for_provider.kms_key_id.as_deref(),
        Some("aws/secretsmanager")
    );
    info!("Secret created");

    source_value(&harness, "v2");
    assert_eq!(reconciler.reconcile("db-password").await, SHORT);
    assert_eq!(
        api.updates.lock().clone(),
        vec![(None, Some("v2".to_string()))]
    );

    assert_eq!(reconciler.reconcile("db-password").await, POLL);
    assert_eq!(api.updates.lock().len(), 1);

    info!("Secret rotation test passed");
    Ok(())
}

/// A missing source secret blocks creation without calling AWS
#[tokio::test]
async fn test_secret_missing_source() -> Result<()> {
    init_tracing();

    let api = Arc::new(FakeSecretsManager::default());
    let (harness, reconciler) = setup(api.clone());
    harness.objects.create(secret("db-password"))?;

    assert_eq!(reconciler.reconcile("db-password").await, Outcome::RateLimited);
    assert!(api.tokens.lock().is_empty());
    let synced = get_condition(harness.get("db-password").conditions(), TYPE_SYNCED).cloned();
    assert_eq!(synced.unwrap().status, "False");

    source_value(&harness, "v1");
    assert_eq!(reconciler.reconcile("db-password").await, SHORT);
    assert_eq!(api.tokens.lock().len(), 1);

    info!("Secret missing source test passed");
    Ok(())
}

/// Deletion schedules the secret with its recovery window
#[tokio::test]
async fn test_secret_delete_uses_recovery_window() -> Result<()> {
    init_tracing();

    let api = Arc::new(FakeSecretsManager::default());
    let (harness, reconciler) = setup(api.clone());
    source_value(&harness, "v1");
    harness.objects.create(secret("db-password"))?;
    reconciler.reconcile("db-password").await;

    harness.objects.delete("db-password")?;
    assert_eq!(reconciler.reconcile("db-password").await, Outcome::Forget);
    assert_eq!(
        api.deletions.lock().clone(),
        vec![("db-password".to_string(), Some(7))]
    );
    assert!(harness.objects.snapshot("db-password").is_none());

    info!("Secret delete test passed");
    Ok(())
}
