//! Secrets Manager secrets
//!
//! The secret string lives in a Kubernetes Secret and is compared against
//! `GetSecretValue` on every observe, so rotating the source value rolls a
//! new secret version. A secret scheduled for deletion is treated as gone.

mod api;
mod crd;

pub use api::{SdkSecretsManager, SecretDescription, SecretInput, SecretsManagerApi};
pub use crd::{Secret, SecretObservation, SecretParameters, SecretSpec, SecretStatus};

use crate::config::secret_value;
use async_trait::async_trait;
use aws_config::SdkConfig;
use kube::ResourceExt;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use stratus_core::drift::{diff_tags, late_init_string};
use stratus_core::error::{ProviderError, Result};
use stratus_core::external::{
    ExternalClient, ExternalCreation, ExternalDeletion, ExternalObservation, ExternalUpdate,
    HookedClient, Hooks,
};
use stratus_core::publisher::{insert_detail, ConnectionDetails};
use stratus_core::store::StoreSet;
use tracing::debug;

/// Connection detail key for the secret ARN
pub const ARN_KEY: &str = "arn";

/// What one observe read about a secret
#[derive(Debug, Clone)]
pub struct ObservedSecret {
    pub description: SecretDescription,
    pub value: Option<SecretString>,
}

/// Hooks for the Secret kind
pub struct SecretHooks {
    api: Arc<dyn SecretsManagerApi>,
    stores: StoreSet,
}

impl SecretHooks {
    pub fn new(api: Arc<dyn SecretsManagerApi>, stores: StoreSet) -> Self {
        Self { api, stores }
    }

    /// Desired secret string from the referenced Kubernetes Secret
    async fn desired_value(&self, secret: &Secret) -> Result<Option<SecretString>> {
        match &secret.spec.for_provider.string_secret_ref {
            Some(selector) => Ok(Some(secret_value(&self.stores, selector).await?)),
            None => Ok(None),
        }
    }
}

fn value_matches(desired: Option<&SecretString>, observed: Option<&SecretString>) -> bool {
    match (desired, observed) {
        (None, _) => true,
        (Some(d), Some(o)) => d.expose_secret() == o.expose_secret(),
        (Some(_), None) => false,
    }
}

fn arn_details(arn: &str) -> ConnectionDetails {
    let mut details = ConnectionDetails::new();
    insert_detail(&mut details, ARN_KEY, arn);
    details
}

fn differs(desired: &Option<String>, observed: &Option<String>) -> bool {
    desired.is_some() && desired != observed
}

#[async_trait]
impl Hooks<Secret> for SecretHooks {
    type Observed = ObservedSecret;

    async fn describe(&self, secret: &Secret) -> Result<Option<ObservedSecret>> {
        let name = secret.secret_name();
        let description = match self.api.describe_secret(&name).await {
            Ok(d) if d.deleted => {
                debug!(secret = %name, "Secret is scheduled for deletion");
                return Ok(None);
            }
            Ok(d) => d,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let value = self.api.get_secret_value(&name).await?;
        Ok(Some(ObservedSecret { description, value }))
    }

    fn late_initialize(&self, secret: &mut Secret, observed: &ObservedSecret) -> bool {
        let p = &mut secret.spec.for_provider;
        let d = &observed.description;
        let mut changed = late_init_string(&mut p.description, d.description.as_deref());
        changed |= late_init_string(&mut p.kms_key_id, d.kms_key_id.as_deref());
        changed
    }

    async fn is_up_to_date(&self, secret: &Secret, observed: &ObservedSecret) -> Result<bool> {
        let p = &secret.spec.for_provider;
        let d = &observed.description;
        if differs(&p.description, &d.description) || differs(&p.kms_key_id, &d.kms_key_id) {
            return Ok(false);
        }
        if !diff_tags(&p.tags, &d.tags).is_empty() {
            return Ok(false);
        }
        let desired = self.desired_value(secret).await?;
        Ok(value_matches(desired.as_ref(), observed.value.as_ref()))
    }

    async fn post_observe(
        &self,
        secret: &mut Secret,
        observed: &ObservedSecret,
        observation: ExternalObservation,
    ) -> Result<ExternalObservation> {
        secret.status.get_or_insert_with(Default::default).at_provider = SecretObservation {
            arn: Some(observed.description.arn.clone()),
            last_changed_date: observed.description.last_changed_date.clone(),
        };
        Ok(observation.with_connection_details(arn_details(&observed.description.arn)))
    }

    async fn create(&self, secret: &mut Secret) -> Result<ExternalCreation> {
        let p = &secret.spec.for_provider;
        let input = SecretInput {
            description: p.description.clone(),
            kms_key_id: p.kms_key_id.clone(),
            secret_string: self.desired_value(secret).await?,
        };
        let token = secret.uid().ok_or_else(|| {
            ProviderError::Internal(format!("{} has no uid", secret.name_any()))
        })?;
        let arn = self
            .api
            .create_secret(&secret.secret_name(), &input, &p.tags, &token)
            .await?;
        secret.status.get_or_insert_with(Default::default).at_provider.arn = Some(arn.clone());
        Ok(ExternalCreation {
            connection_details: arn_details(&arn),
            ..Default::default()
        })
    }

    async fn update(
        &self,
        secret: &mut Secret,
        observed: Option<&ObservedSecret>,
    ) -> Result<ExternalUpdate> {
        let name = secret.secret_name();
        let described;
        let observed = match observed {
            Some(observed) => observed,
            None => {
                described = self
                    .describe(secret)
                    .await?
                    .ok_or_else(|| ProviderError::NotFound(format!("secret {name}")))?;
                &described
            }
        };

        let p = &secret.spec.for_provider;
        let d = &observed.description;
        let desired = self.desired_value(secret).await?;
        let value_changed = !value_matches(desired.as_ref(), observed.value.as_ref());
        let input = SecretInput {
            description: p
                .description
                .clone()
                .filter(|_| differs(&p.description, &d.description)),
            kms_key_id: p
                .kms_key_id
                .clone()
                .filter(|_| differs(&p.kms_key_id, &d.kms_key_id)),
            secret_string: desired.filter(|_| value_changed),
        };
        if input.description.is_some() || input.kms_key_id.is_some() || input.secret_string.is_some()
        {
            self.api.update_secret(&name, &input).await?;
        }

        let tags = diff_tags(&p.tags, &d.tags);
        if !tags.remove.is_empty() {
            self.api.untag_resource(&name, &tags.remove).await?;
        }
        if !tags.add.is_empty() {
            self.api.tag_resource(&name, &tags.add).await?;
        }
        Ok(ExternalUpdate {
            connection_details: arn_details(&d.arn),
            ..Default::default()
        })
    }

    async fn delete(
        &self,
        secret: &mut Secret,
        _observed: Option<&ObservedSecret>,
    ) -> Result<ExternalDeletion> {
        let p = &secret.spec.for_provider;
        self.api
            .delete_secret(
                &secret.secret_name(),
                p.recovery_window_in_days,
                p.force_delete_without_recovery,
            )
            .await?;
        Ok(ExternalDeletion {
            completed: true,
            operation_id: None,
        })
    }
}

/// External client for Secrets over an SDK config
pub fn client(sdk: &SdkConfig, stores: &StoreSet) -> Box<dyn ExternalClient<Secret>> {
    let api = SdkSecretsManager::new(aws_sdk_secretsmanager::Client::new(sdk));
    Box::new(HookedClient::new(SecretHooks::new(
        Arc::new(api),
        stores.clone(),
    )))
}
