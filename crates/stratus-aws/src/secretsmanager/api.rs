//! The Secrets Manager calls the Secret adapter makes

use crate::error::classify;
use async_trait::async_trait;
use aws_sdk_secretsmanager::types::Tag;
use aws_sdk_secretsmanager::Client;
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;
use stratus_core::error::{ProviderError, Result};

/// What DescribeSecret reports
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecretDescription {
    pub arn: String,
    pub name: String,
    pub description: Option<String>,
    pub kms_key_id: Option<String>,
    pub tags: BTreeMap<String, String>,
    /// Scheduled for deletion
    pub deleted: bool,
    pub last_changed_date: Option<String>,
}

/// Inputs shared by create and update
#[derive(Debug, Clone, Default)]
pub struct SecretInput {
    pub description: Option<String>,
    pub kms_key_id: Option<String>,
    pub secret_string: Option<SecretString>,
}

#[async_trait]
pub trait SecretsManagerApi: Send + Sync {
    async fn describe_secret(&self, id: &str) -> Result<SecretDescription>;

    /// Current secret string; `None` if the secret has no value
    async fn get_secret_value(&self, id: &str) -> Result<Option<SecretString>>;

    /// Returns the ARN
    async fn create_secret(
        &self,
        name: &str,
        input: &SecretInput,
        tags: &BTreeMap<String, String>,
        client_request_token: &str,
    ) -> Result<String>;

    async fn update_secret(&self, id: &str, input: &SecretInput) -> Result<()>;

    async fn tag_resource(&self, id: &str, tags: &BTreeMap<String, String>) -> Result<()>;

    async fn untag_resource(&self, id: &str, keys: &[String]) -> Result<()>;

    async fn delete_secret(
        &self,
        id: &str,
        recovery_window_in_days: Option<i64>,
        force_delete_without_recovery: Option<bool>,
    ) -> Result<()>;
}

/// [`SecretsManagerApi`] over the AWS SDK
pub struct SdkSecretsManager {
    client: Client,
}

impl SdkSecretsManager {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn sdk_tags(tags: &BTreeMap<String, String>) -> Vec<Tag> {
    tags.iter()
        .map(|(k, v)| Tag::builder().key(k).value(v).build())
        .collect()
}

fn exposed(value: &Option<SecretString>) -> Option<String> {
    value.as_ref().map(|v| v.expose_secret().to_string())
}

#[async_trait]
impl SecretsManagerApi for SdkSecretsManager {
    async fn describe_secret(&self, id: &str) -> Result<SecretDescription> {
        let out = self
            .client
            .describe_secret()
            .secret_id(id)
            .send()
            .await
            .map_err(classify)?;
        Ok(SecretDescription {
            arn: out.arn().unwrap_or_default().to_string(),
            name: out.name().unwrap_or(id).to_string(),
            description: out.description().map(str::to_string),
            kms_key_id: out.kms_key_id().map(str::to_string),
            tags: out
                .tags()
                .iter()
                .filter_map(|t| {
                    Some((t.key()?.to_string(), t.value().unwrap_or_default().to_string()))
                })
                .collect(),
            deleted: out.deleted_date().is_some(),
            last_changed_date: out.last_changed_date().map(|d| d.to_string()),
        })
    }

    async fn get_secret_value(&self, id: &str) -> Result<Option<SecretString>> {
        match self.client.get_secret_value().secret_id(id).send().await {
            Ok(out) => Ok(out.secret_string().map(SecretString::from)),
            Err(e) => match classify(e) {
                err if err.is_not_found() => Ok(None),
                err => Err(err),
            },
        }
    }

    async fn create_secret(
        &self,
        name: &str,
        input: &SecretInput,
        tags: &BTreeMap<String, String>,
        client_request_token: &str,
    ) -> Result<String> {
        let out = self
            .client
            .create_secret()
            .name(name)
            .client_request_token(client_request_token)
            .set_description(input.description.clone())
            .set_kms_key_id(input.kms_key_id.clone())
            .set_secret_string(exposed(&input.secret_string))
            .set_tags((!tags.is_empty()).then(|| sdk_tags(tags)))
            .send()
            .await
            .map_err(classify)?;
        out.arn()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Transient(format!("no ARN returned for secret {name}")))
    }

    async fn update_secret(&self, id: &str, input: &SecretInput) -> Result<()> {
        self.client
            .update_secret()
            .secret_id(id)
            .set_description(input.description.clone())
            .set_kms_key_id(input.kms_key_id.clone())
            .set_secret_string(exposed(&input.secret_string))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn tag_resource(&self, id: &str, tags: &BTreeMap<String, String>) -> Result<()> {
        self.client
            .tag_resource()
            .secret_id(id)
            .set_tags(Some(sdk_tags(tags)))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn untag_resource(&self, id: &str, keys: &[String]) -> Result<()> {
        self.client
            .untag_resource()
            .secret_id(id)
            .set_tag_keys(Some(keys.to_vec()))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_secret(
        &self,
        id: &str,
        recovery_window_in_days: Option<i64>,
        force_delete_without_recovery: Option<bool>,
    ) -> Result<()> {
        self.client
            .delete_secret()
            .secret_id(id)
            .set_recovery_window_in_days(recovery_window_in_days)
            .set_force_delete_without_recovery(force_delete_without_recovery)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }
}
