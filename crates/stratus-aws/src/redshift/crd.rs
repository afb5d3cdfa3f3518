//! Redshift `Cluster` custom resource

use crate::clients::{validate_fields, AwsResource};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use stratus_core::error::Result;
use stratus_core::managed_resource;
use stratus_core::resource::{external_name, ResourceSpec, ResourceStatus, SecretKeySelector};
use validator::{Validate, ValidationError};

fn validate_cluster_type(value: &str) -> std::result::Result<(), ValidationError> {
    match value {
        "single-node" | "multi-node" => Ok(()),
        _ => Err(ValidationError::new("cluster_type")
            .with_message("must be single-node or multi-node".into())),
    }
}

fn validate_cluster_shape(params: &ClusterParameters) -> std::result::Result<(), ValidationError> {
    match (params.cluster_type.as_deref(), params.number_of_nodes) {
        (Some("single-node"), Some(n)) if n > 1 => Err(ValidationError::new("cluster_shape")
            .with_message("single-node clusters cannot have more than one node".into())),
        (Some("multi-node"), Some(1)) => Err(ValidationError::new("cluster_shape")
            .with_message("multi-node clusters need at least two nodes".into())),
        _ => Ok(()),
    }
}

/// Cluster custom resource definition
///
/// The external name is the cluster identifier. Setting
/// `newClusterIdentifier` renames the cluster and moves the external name.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "redshift.aws.stratus.dev",
    version = "v1beta1",
    kind = "Cluster",
    plural = "clusters",
    status = "ClusterStatus",
    category = "stratus",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Synced", "type":"string", "jsonPath":".status.conditions[?(@.type=='Synced')].status"}"#,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.atProvider.clusterStatus"}"#,
    printcolumn = r#"{"name":"External-Name", "type":"string", "jsonPath":".metadata.annotations.crossplane\\.io/external-name"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    pub for_provider: ClusterParameters,

    #[serde(flatten)]
    pub resource: ResourceSpec,
}

/// Desired cluster configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_cluster_shape"))]
pub struct ClusterParameters {
    #[validate(length(min = 1, message = "region is required"))]
    pub region: String,

    /// Node type, e.g. `ra3.xlplus`. Required to create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,

    /// `single-node` or `multi-node`; derived from the node count when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_cluster_type"))]
    pub cluster_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 128, message = "must be between 1 and 128"))]
    pub number_of_nodes: Option<i32>,

    #[validate(length(min = 1, max = 128, message = "must be 1 to 128 characters"))]
    pub master_username: String,

    /// Secret key holding the master password. Generated on create when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_password_secret_ref: Option<SecretKeySelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1150, max = 65535, message = "must be between 1150 and 65535"))]
    pub port: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_version_upgrade: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0, max = 35, message = "must be between 0 and 35"))]
    pub automated_snapshot_retention_period: Option<i32>,

    /// Days; -1 keeps manual snapshots indefinitely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = -1, max = 3653, message = "must be -1 or between 1 and 3653"))]
    pub manual_snapshot_retention_period: Option<i32>,

    /// `ddd:hh24:mi-ddd:hh24:mi`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_maintenance_window: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publicly_accessible: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_key_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enhanced_vpc_routing: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_parameter_group_name: Option<String>,

    /// Create-only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_subnet_group_name: Option<String>,

    /// Create-only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vpc_security_group_ids: Vec<String>,

    /// IAM role ARNs attached at create time
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub iam_roles: Vec<String>,

    /// Rename the cluster to this identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_cluster_identifier: Option<String>,

    #[serde(default)]
    pub skip_final_cluster_snapshot: bool,

    /// Required on delete unless `skipFinalClusterSnapshot` is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_cluster_snapshot_identifier: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_cluster_snapshot_retention_period: Option<i32>,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterEndpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

/// Observed cluster state
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterObservation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_availability_status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<ClusterEndpoint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_create_time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default)]
    pub at_provider: ClusterObservation,

    #[serde(flatten)]
    pub resource: ResourceStatus,
}

managed_resource!(Cluster, ClusterStatus);

impl Cluster {
    /// Current cluster identifier on the AWS side
    pub fn cluster_identifier(&self) -> String {
        external_name(self)
            .map(str::to_string)
            .unwrap_or_else(|| self.name_any())
    }
}

impl AwsResource for Cluster {
    fn region(&self) -> &str {
        &self.spec.for_provider.region
    }

    fn validate_parameters(&self) -> Result<()> {
        validate_fields(&self.spec.for_provider)
    }
}
