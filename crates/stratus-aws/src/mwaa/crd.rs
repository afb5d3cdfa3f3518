//! MWAA `Environment` custom resource

use crate::clients::{validate_fields, AwsResource};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use stratus_core::error::Result;
use stratus_core::managed_resource;
use stratus_core::resource::{external_name, ResourceSpec, ResourceStatus};
use validator::{Validate, ValidationError};

const ACCESS_MODES: &[&str] = &["PRIVATE_ONLY", "PUBLIC_ONLY"];

fn validate_access_mode(mode: &str) -> std::result::Result<(), ValidationError> {
    if ACCESS_MODES.contains(&mode) {
        Ok(())
    } else {
        Err(ValidationError::new("webserver_access_mode")
            .with_message("must be PRIVATE_ONLY or PUBLIC_ONLY".into()))
    }
}

fn validate_workers(params: &EnvironmentParameters) -> std::result::Result<(), ValidationError> {
    if let (Some(min), Some(max)) = (params.min_workers, params.max_workers) {
        if min > max {
            return Err(ValidationError::new("workers")
                .with_message("minWorkers cannot exceed maxWorkers".into()));
        }
    }
    Ok(())
}

/// Environment custom resource definition
///
/// The external name is the environment name.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "mwaa.aws.stratus.dev",
    version = "v1beta1",
    kind = "Environment",
    plural = "environments",
    status = "EnvironmentStatus",
    category = "stratus",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Synced", "type":"string", "jsonPath":".status.conditions[?(@.type=='Synced')].status"}"#,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.atProvider.status"}"#,
    printcolumn = r#"{"name":"External-Name", "type":"string", "jsonPath":".metadata.annotations.crossplane\\.io/external-name"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSpec {
    pub for_provider: EnvironmentParameters,

    #[serde(flatten)]
    pub resource: ResourceSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfiguration {
    #[validate(length(min = 2, max = 2, message = "exactly two subnets are required"))]
    pub subnet_ids: Vec<String>,

    #[validate(length(min = 1, max = 5, message = "must list 1 to 5 security groups"))]
    pub security_group_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_workers"))]
pub struct EnvironmentParameters {
    #[validate(length(min = 1, message = "region is required"))]
    pub region: String,

    #[validate(length(min = 1, message = "executionRoleArn is required"))]
    pub execution_role_arn: String,

    /// Bucket holding DAGs, plugins and requirements
    #[validate(length(min = 1, message = "sourceBucketArn is required"))]
    pub source_bucket_arn: String,

    /// DAG folder relative to the source bucket
    #[validate(length(min = 1, message = "dagS3Path is required"))]
    pub dag_s3_path: String,

    #[validate(nested)]
    pub network_configuration: NetworkConfiguration,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub airflow_version: Option<String>,

    /// mw1.small, mw1.medium or mw1.large
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_class: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 25, message = "must be between 1 and 25"))]
    pub max_workers: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 25, message = "must be between 1 and 25"))]
    pub min_workers: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 2, max = 5, message = "must be between 2 and 5"))]
    pub schedulers: Option<i32>,

    /// Only honoured at creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins_s3_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements_s3_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_script_s3_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_access_mode"))]
    pub webserver_access_mode: Option<String>,

    /// e.g. `TUE:03:30`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekly_maintenance_window_start: Option<String>,

    #[serde(default)]
    pub airflow_configuration_options: BTreeMap<String, String>,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentObservation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webserver_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentStatus {
    #[serde(default)]
    pub at_provider: EnvironmentObservation,

    #[serde(flatten)]
    pub resource: ResourceStatus,
}

managed_resource!(Environment, EnvironmentStatus);

impl Environment {
    pub fn environment_name(&self) -> String {
        external_name(self)
            .map(str::to_string)
            .unwrap_or_else(|| self.name_any())
    }
}

impl AwsResource for Environment {
    fn region(&self) -> &str {
        &self.spec.for_provider.region
    }

    fn validate_parameters(&self) -> Result<()> {
        validate_fields(&self.spec.for_provider)
    }
}
