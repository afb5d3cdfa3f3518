//! Cloud Map namespace custom resources
//!
//! Three kinds share one parameter block. The external name is the
//! namespace id AWS assigns once the create operation succeeds.

use crate::clients::{validate_fields, AwsResource};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use stratus_core::error::Result;
use stratus_core::managed_resource;
use stratus_core::resource::{ResourceSpec, ResourceStatus};
use validator::Validate;

/// Parameters every namespace kind has
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceParameters {
    #[validate(length(min = 1, message = "region is required"))]
    pub region: String,

    /// Namespace name; the DNS domain for DNS namespaces
    #[validate(length(min = 1, max = 1024, message = "must be 1 to 1024 characters"))]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 1024, message = "must be at most 1024 characters"))]
    pub description: Option<String>,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PrivateDnsNamespaceParameters {
    #[serde(flatten)]
    #[validate(nested)]
    pub namespace: NamespaceParameters,

    /// VPC the private hosted zone is associated with
    #[validate(length(min = 1, message = "vpc is required"))]
    pub vpc: String,
}

/// Observed namespace state
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceObservation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosted_zone_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_date: Option<String>,

    /// Create, update or delete operation still in flight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceStatus {
    #[serde(default)]
    pub at_provider: NamespaceObservation,

    #[serde(flatten)]
    pub resource: ResourceStatus,
}

/// Private DNS namespace custom resource definition
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "servicediscovery.aws.stratus.dev",
    version = "v1beta1",
    kind = "PrivateDNSNamespace",
    plural = "privatednsnamespaces",
    status = "NamespaceStatus",
    category = "stratus",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Synced", "type":"string", "jsonPath":".status.conditions[?(@.type=='Synced')].status"}"#,
    printcolumn = r#"{"name":"External-Name", "type":"string", "jsonPath":".metadata.annotations.crossplane\\.io/external-name"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PrivateDNSNamespaceSpec {
    pub for_provider: PrivateDnsNamespaceParameters,

    #[serde(flatten)]
    pub resource: ResourceSpec,
}

/// Public DNS namespace custom resource definition
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "servicediscovery.aws.stratus.dev",
    version = "v1beta1",
    kind = "PublicDNSNamespace",
    plural = "publicdnsnamespaces",
    status = "NamespaceStatus",
    category = "stratus",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Synced", "type":"string", "jsonPath":".status.conditions[?(@.type=='Synced')].status"}"#,
    printcolumn = r#"{"name":"External-Name", "type":"string", "jsonPath":".metadata.annotations.crossplane\\.io/external-name"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PublicDNSNamespaceSpec {
    pub for_provider: NamespaceParameters,

    #[serde(flatten)]
    pub resource: ResourceSpec,
}

/// HTTP namespace custom resource definition
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "servicediscovery.aws.stratus.dev",
    version = "v1beta1",
    kind = "HTTPNamespace",
    plural = "httpnamespaces",
    status = "NamespaceStatus",
    category = "stratus",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Synced", "type":"string", "jsonPath":".status.conditions[?(@.type=='Synced')].status"}"#,
    printcolumn = r#"{"name":"External-Name", "type":"string", "jsonPath":".metadata.annotations.crossplane\\.io/external-name"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HTTPNamespaceSpec {
    pub for_provider: NamespaceParameters,

    #[serde(flatten)]
    pub resource: ResourceSpec,
}

managed_resource!(PrivateDNSNamespace, NamespaceStatus, false, async_operations);
managed_resource!(PublicDNSNamespace, NamespaceStatus, false, async_operations);
managed_resource!(HTTPNamespace, NamespaceStatus, false, async_operations);

/// Namespace flavour, which picks the create and update calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceType {
    PrivateDns,
    PublicDns,
    Http,
}

/// Access to what the namespace kinds have in common
pub trait NamespaceResource: AwsResource {
    const NAMESPACE_TYPE: NamespaceType;

    fn namespace(&self) -> &NamespaceParameters;

    fn namespace_mut(&mut self) -> &mut NamespaceParameters;

    /// VPC id for private DNS namespaces
    fn vpc(&self) -> Option<&str> {
        None
    }

    fn observation_mut(&mut self) -> &mut NamespaceObservation;
}

macro_rules! namespace_kind {
    ($kind:ty, $ty:expr $(, $field:ident)? $(; vpc = $vpc:ident)?) => {
        impl NamespaceResource for $kind {
            const NAMESPACE_TYPE: NamespaceType = $ty;

            fn namespace(&self) -> &NamespaceParameters {
                &self.spec.for_provider $(.$field)?
            }

            fn namespace_mut(&mut self) -> &mut NamespaceParameters {
                &mut self.spec.for_provider $(.$field)?
            }

            $(
                fn vpc(&self) -> Option<&str> {
                    Some(self.spec.for_provider.$vpc.as_str())
                }
            )?

            fn observation_mut(&mut self) -> &mut NamespaceObservation {
                &mut self.status.get_or_insert_with(Default::default).at_provider
            }
        }

        impl AwsResource for $kind {
            fn region(&self) -> &str {
                &self.namespace().region
            }

            fn validate_parameters(&self) -> Result<()> {
                validate_fields(&self.spec.for_provider)
            }
        }
    };
}

namespace_kind!(PrivateDNSNamespace, NamespaceType::PrivateDns, namespace; vpc = vpc);
namespace_kind!(PublicDNSNamespace, NamespaceType::PublicDns);
namespace_kind!(HTTPNamespace, NamespaceType::Http);
