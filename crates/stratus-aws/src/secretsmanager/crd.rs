//! Secrets Manager `Secret` custom resource

use crate::clients::{validate_fields, AwsResource};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use stratus_core::error::Result;
use stratus_core::managed_resource;
use stratus_core::resource::{external_name, ResourceSpec, ResourceStatus, SecretKeySelector};
use validator::{Validate, ValidationError};

fn validate_deletion(params: &SecretParameters) -> std::result::Result<(), ValidationError> {
    if params.force_delete_without_recovery == Some(true) && params.recovery_window_in_days.is_some()
    {
        return Err(ValidationError::new("deletion").with_message(
            "recoveryWindowInDays cannot be combined with forceDeleteWithoutRecovery".into(),
        ));
    }
    Ok(())
}

/// Secret custom resource definition
///
/// The external name is the secret name. The secret value is read from a
/// key of a Kubernetes Secret.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "secretsmanager.aws.stratus.dev",
    version = "v1beta1",
    kind = "Secret",
    plural = "secrets",
    status = "SecretStatus",
    category = "stratus",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Synced", "type":"string", "jsonPath":".status.conditions[?(@.type=='Synced')].status"}"#,
    printcolumn = r#"{"name":"External-Name", "type":"string", "jsonPath":".metadata.annotations.crossplane\\.io/external-name"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SecretSpec {
    pub for_provider: SecretParameters,

    #[serde(flatten)]
    pub resource: ResourceSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_deletion"))]
pub struct SecretParameters {
    #[validate(length(min = 1, message = "region is required"))]
    pub region: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 2048, message = "must be at most 2048 characters"))]
    pub description: Option<String>,

    /// KMS key that encrypts the secret; the AWS managed key when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_key_id: Option<String>,

    /// Kubernetes Secret key holding the secret string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_secret_ref: Option<SecretKeySelector>,

    /// Days AWS keeps a deleted secret recoverable (7-30)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 7, max = 30, message = "must be between 7 and 30"))]
    pub recovery_window_in_days: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_delete_without_recovery: Option<bool>,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretObservation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_changed_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretStatus {
    #[serde(default)]
    pub at_provider: SecretObservation,

    #[serde(flatten)]
    pub resource: ResourceStatus,
}

managed_resource!(Secret, SecretStatus);

impl Secret {
    pub fn secret_name(&self) -> String {
        external_name(self)
            .map(str::to_string)
            .unwrap_or_else(|| self.name_any())
    }
}

impl AwsResource for Secret {
    fn region(&self) -> &str {
        &self.spec.for_provider.region
    }

    fn validate_parameters(&self) -> Result<()> {
        validate_fields(&self.spec.for_provider)
    }
}
