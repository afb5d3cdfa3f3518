//! SQS `Queue` custom resource

use crate::clients::{validate_fields, AwsResource};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use stratus_core::error::{ProviderError, Result};
use stratus_core::managed_resource;
use stratus_core::resource::{external_name, Reference, ResourceSpec, ResourceStatus, Selector};
use validator::{Validate, ValidationError};

const REDRIVE_PERMISSIONS: &[&str] = &["allowAll", "denyAll", "byQueue"];

fn validate_redrive_permission(permission: &str) -> std::result::Result<(), ValidationError> {
    if REDRIVE_PERMISSIONS.contains(&permission) {
        Ok(())
    } else {
        Err(ValidationError::new("redrive_permission")
            .with_message("must be allowAll, denyAll or byQueue".into()))
    }
}

/// Queue custom resource definition
///
/// The external name is the queue name and defaults to the resource name.
/// FIFO queues must be named with a `.fifo` suffix.
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "sqs.aws.stratus.dev",
    version = "v1beta1",
    kind = "Queue",
    plural = "queues",
    status = "QueueStatus",
    category = "stratus",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Synced", "type":"string", "jsonPath":".status.conditions[?(@.type=='Synced')].status"}"#,
    printcolumn = r#"{"name":"External-Name", "type":"string", "jsonPath":".metadata.annotations.crossplane\\.io/external-name"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct QueueSpec {
    pub for_provider: QueueParameters,

    #[serde(flatten)]
    pub resource: ResourceSpec,
}

/// Desired queue attributes
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QueueParameters {
    /// AWS region of the queue
    #[validate(length(min = 1, message = "region is required"))]
    pub region: String,

    /// Seconds every message is delayed (0-900)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0, max = 900, message = "must be between 0 and 900"))]
    pub delay_seconds: Option<i64>,

    /// Largest accepted message in bytes (1024-262144)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1024, max = 262144, message = "must be between 1024 and 262144"))]
    pub maximum_message_size: Option<i64>,

    /// Seconds a message is retained (60-1209600)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 60, max = 1209600, message = "must be between 60 and 1209600"))]
    pub message_retention_period: Option<i64>,

    /// Long-poll wait in seconds (0-20)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0, max = 20, message = "must be between 0 and 20"))]
    pub receive_message_wait_time_seconds: Option<i64>,

    /// Visibility timeout in seconds (0-43200)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0, max = 43200, message = "must be between 0 and 43200"))]
    pub visibility_timeout: Option<i64>,

    /// Access policy document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub redrive_policy: Option<RedrivePolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub redrive_allow_policy: Option<RedriveAllowPolicy>,

    /// KMS key for server-side encryption
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_master_key_id: Option<String>,

    /// Seconds a data key is reused (60-86400)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 60, max = 86400, message = "must be between 60 and 86400"))]
    pub kms_data_key_reuse_period_seconds: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqs_managed_sse_enabled: Option<bool>,

    /// Immutable after creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fifo_queue: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_based_deduplication: Option<bool>,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Dead-letter configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RedrivePolicy {
    /// ARN of the dead-letter queue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_target_arn: Option<String>,

    /// Queue resource whose ARN fills `deadLetterTargetArn`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_target_arn_ref: Option<Reference>,

    /// Selects a Queue resource whose ARN fills `deadLetterTargetArn`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_letter_target_arn_selector: Option<Selector>,

    /// Receives before a message moves to the dead-letter queue (1-1000)
    #[validate(range(min = 1, max = 1000, message = "must be between 1 and 1000"))]
    pub max_receive_count: i64,
}

/// Source queues allowed to use this queue as their dead-letter queue
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RedriveAllowPolicy {
    /// `allowAll`, `denyAll` or `byQueue`
    #[validate(custom(function = "validate_redrive_permission"))]
    pub redrive_permission: String,

    /// Allowed source queue ARNs for `byQueue`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[validate(length(max = 10, message = "at most 10 source queues"))]
    pub source_queue_arns: Vec<String>,

    /// Queue resources whose ARNs fill `sourceQueueArns`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_queue_arn_refs: Vec<Reference>,

    /// Selects Queue resources whose ARNs fill `sourceQueueArns`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_queue_arn_selector: Option<Selector>,
}

/// Observed queue state
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueObservation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approximate_number_of_messages: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approximate_number_of_messages_delayed: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approximate_number_of_messages_not_visible: Option<i64>,

    /// Epoch seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_timestamp: Option<i64>,

    /// Epoch seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    #[serde(default)]
    pub at_provider: QueueObservation,

    #[serde(flatten)]
    pub resource: ResourceStatus,
}

managed_resource!(Queue, QueueStatus);

impl Queue {
    /// Queue name on the AWS side
    pub fn queue_name(&self) -> String {
        external_name(self)
            .map(str::to_string)
            .unwrap_or_else(|| self.name_any())
    }

    pub fn is_fifo(&self) -> bool {
        self.spec.for_provider.fifo_queue.unwrap_or(false)
    }

    pub fn arn(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.at_provider.arn.as_deref())
    }
}

impl AwsResource for Queue {
    fn region(&self) -> &str {
        &self.spec.for_provider.region
    }

    fn validate_parameters(&self) -> Result<()> {
        validate_fields(&self.spec.for_provider)?;
        let name = self.queue_name();
        if self.is_fifo() && !name.ends_with(".fifo") {
            return Err(ProviderError::Validation(format!(
                "fifoQueue: queue name {name} must end with .fifo"
            )));
        }
        if !self.is_fifo() && name.ends_with(".fifo") {
            return Err(ProviderError::Validation(format!(
                "fifoQueue: queue name {name} ends with .fifo but fifoQueue is not set"
            )));
        }
        Ok(())
    }
}
