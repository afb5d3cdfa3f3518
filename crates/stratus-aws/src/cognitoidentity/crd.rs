//! Cognito `IdentityPool` custom resource

use crate::clients::{validate_fields, AwsResource};
use kube::CustomResource;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use stratus_core::error::Result;
use stratus_core::managed_resource;
use stratus_core::resource::{ResourceSpec, ResourceStatus};
use validator::{Validate, ValidationError};

static POOL_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w ]{1,128}$").unwrap());

fn validate_pool_name(name: &str) -> std::result::Result<(), ValidationError> {
    if POOL_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::new("identity_pool_name").with_message(
            "must be 1 to 128 word characters or spaces".into(),
        ))
    }
}

/// IdentityPool custom resource definition
///
/// AWS assigns the pool id at creation; it becomes the external name.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cognitoidentity.aws.stratus.dev",
    version = "v1beta1",
    kind = "IdentityPool",
    plural = "identitypools",
    status = "IdentityPoolStatus",
    category = "stratus",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Synced", "type":"string", "jsonPath":".status.conditions[?(@.type=='Synced')].status"}"#,
    printcolumn = r#"{"name":"External-Name", "type":"string", "jsonPath":".metadata.annotations.crossplane\\.io/external-name"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IdentityPoolSpec {
    pub for_provider: IdentityPoolParameters,

    #[serde(flatten)]
    pub resource: ResourceSpec,
}

/// A Cognito user pool app client trusted by the identity pool
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CognitoIdentityProvider {
    /// e.g. `cognito-idp.us-east-1.amazonaws.com/us-east-1_abc`
    pub provider_name: String,

    pub client_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_side_token_check: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IdentityPoolParameters {
    #[validate(length(min = 1, message = "region is required"))]
    pub region: String,

    #[validate(custom(function = "validate_pool_name"))]
    pub identity_pool_name: String,

    pub allow_unauthenticated_identities: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_classic_flow: Option<bool>,

    /// Provider domain to app id, e.g. `graph.facebook.com`
    #[serde(default)]
    pub supported_login_providers: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 128, message = "must be 1 to 128 characters"))]
    pub developer_provider_name: Option<String>,

    #[serde(default)]
    pub open_id_connect_provider_arns: Vec<String>,

    #[serde(default)]
    pub cognito_identity_providers: Vec<CognitoIdentityProvider>,

    #[serde(default)]
    pub saml_provider_arns: Vec<String>,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdentityPoolObservation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_pool_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdentityPoolStatus {
    #[serde(default)]
    pub at_provider: IdentityPoolObservation,

    #[serde(flatten)]
    pub resource: ResourceStatus,
}

managed_resource!(IdentityPool, IdentityPoolStatus, false);

impl AwsResource for IdentityPool {
    fn region(&self) -> &str {
        &self.spec.for_provider.region
    }

    fn validate_parameters(&self) -> Result<()> {
        validate_fields(&self.spec.for_provider)
    }
}
