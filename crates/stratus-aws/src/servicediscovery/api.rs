//! The Cloud Map calls the namespace adapters make

use super::crd::NamespaceType;
use crate::error::classify;
use async_trait::async_trait;
use aws_sdk_servicediscovery::types::{
    HttpNamespaceChange, PrivateDnsNamespaceChange, PublicDnsNamespaceChange, Tag,
};
use aws_sdk_servicediscovery::Client;
use std::collections::BTreeMap;
use stratus_core::error::{ProviderError, Result};
use stratus_core::operation::{Operation, OperationStatus};

/// What GetNamespace reports
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedNamespace {
    pub id: String,
    pub arn: String,
    pub name: String,
    pub description: Option<String>,
    pub hosted_zone_id: Option<String>,
    pub create_date: Option<String>,
}

/// Input of a create call
#[derive(Debug, Clone, PartialEq)]
pub struct CreateNamespace {
    pub namespace_type: NamespaceType,
    pub name: String,
    pub description: Option<String>,
    pub vpc: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub creator_request_id: String,
}

#[async_trait]
pub trait ServiceDiscoveryApi: Send + Sync {
    async fn get_namespace(&self, id: &str) -> Result<ObservedNamespace>;

    async fn list_tags(&self, arn: &str) -> Result<BTreeMap<String, String>>;

    /// Returns the operation id
    async fn create_namespace(&self, input: &CreateNamespace) -> Result<String>;

    /// Returns the operation id
    async fn update_description(
        &self,
        namespace_type: NamespaceType,
        id: &str,
        description: &str,
        updater_request_id: &str,
    ) -> Result<String>;

    /// Returns the operation id
    async fn delete_namespace(&self, id: &str) -> Result<String>;

    async fn get_operation(&self, id: &str) -> Result<Operation>;

    async fn tag_resource(&self, arn: &str, tags: &BTreeMap<String, String>) -> Result<()>;

    async fn untag_resource(&self, arn: &str, keys: &[String]) -> Result<()>;
}

/// [`ServiceDiscoveryApi`] over the AWS SDK
pub struct SdkServiceDiscovery {
    client: Client,
}

impl SdkServiceDiscovery {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn build_failed(what: &str, err: impl std::fmt::Display) -> ProviderError {
    ProviderError::Internal(format!("cannot build {what}: {err}"))
}

fn sdk_tags(tags: &BTreeMap<String, String>) -> Result<Option<Vec<Tag>>> {
    if tags.is_empty() {
        return Ok(None);
    }
    tags.iter()
        .map(|(k, v)| {
            Tag::builder()
                .key(k)
                .value(v)
                .build()
                .map_err(|e| build_failed("tag", e))
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn operation_id(id: Option<&str>, call: &str) -> Result<String> {
    id.map(str::to_string)
        .ok_or_else(|| ProviderError::Transient(format!("{call} returned no operation id")))
}

#[async_trait]
impl ServiceDiscoveryApi for SdkServiceDiscovery {
    async fn get_namespace(&self, id: &str) -> Result<ObservedNamespace> {
        let out = self
            .client
            .get_namespace()
            .id(id)
            .send()
            .await
            .map_err(classify)?;
        let ns = out
            .namespace()
            .ok_or_else(|| ProviderError::NotFound(format!("namespace {id}")))?;
        Ok(ObservedNamespace {
            id: ns.id().unwrap_or(id).to_string(),
            arn: ns.arn().unwrap_or_default().to_string(),
            name: ns.name().unwrap_or_default().to_string(),
            description: ns.description().map(str::to_string),
            hosted_zone_id: ns
                .properties()
                .and_then(|p| p.dns_properties())
                .and_then(|d| d.hosted_zone_id())
                .map(str::to_string),
            create_date: ns.create_date().map(|d| d.to_string()),
        })
    }

    async fn list_tags(&self, arn: &str) -> Result<BTreeMap<String, String>> {
        let out = self
            .client
            .list_tags_for_resource()
            .resource_arn(arn)
            .send()
            .await
            .map_err(classify)?;
        Ok(out
            .tags()
            .iter()
            .map(|t| (t.key().to_string(), t.value().to_string()))
            .collect())
    }

    async fn create_namespace(&self, input: &CreateNamespace) -> Result<String> {
        let tags = sdk_tags(&input.tags)?;
        let id = match input.namespace_type {
            NamespaceType::PrivateDns => {
                let out = self
                    .client
                    .create_private_dns_namespace()
                    .name(&input.name)
                    .set_vpc(input.vpc.clone())
                    .set_description(input.description.clone())
                    .creator_request_id(&input.creator_request_id)
                    .set_tags(tags)
                    .send()
                    .await
                    .map_err(classify)?;
                operation_id(out.operation_id(), "CreatePrivateDnsNamespace")?
            }
            NamespaceType::PublicDns => {
                let out = self
                    .client
                    .create_public_dns_namespace()
                    .name(&input.name)
                    .set_description(input.description.clone())
                    .creator_request_id(&input.creator_request_id)
                    .set_tags(tags)
                    .send()
                    .await
                    .map_err(classify)?;
                operation_id(out.operation_id(), "CreatePublicDnsNamespace")?
            }
            NamespaceType::Http => {
                let out = self
                    .client
                    .create_http_namespace()
                    .name(&input.name)
                    .set_description(input.description.clone())
                    .creator_request_id(&input.creator_request_id)
                    .set_tags(tags)
                    .send()
                    .await
                    .map_err(classify)?;
                operation_id(out.operation_id(), "CreateHttpNamespace")?
            }
        };
        Ok(id)
    }

    async fn update_description(
        &self,
        namespace_type: NamespaceType,
        id: &str,
        description: &str,
        updater_request_id: &str,
    ) -> Result<String> {
        let op = match namespace_type {
            NamespaceType::PrivateDns => {
                let change = PrivateDnsNamespaceChange::builder()
                    .description(description)
                    .build();
                let out = self
                    .client
                    .update_private_dns_namespace()
                    .id(id)
                    .updater_request_id(updater_request_id)
                    .namespace(change)
                    .send()
                    .await
                    .map_err(classify)?;
                operation_id(out.operation_id(), "UpdatePrivateDnsNamespace")?
            }
            NamespaceType::PublicDns => {
                let change = PublicDnsNamespaceChange::builder()
                    .description(description)
                    .build();
                let out = self
                    .client
                    .update_public_dns_namespace()
                    .id(id)
                    .updater_request_id(updater_request_id)
                    .namespace(change)
                    .send()
                    .await
                    .map_err(classify)?;
                operation_id(out.operation_id(), "UpdatePublicDnsNamespace")?
            }
            NamespaceType::Http => {
                let change = HttpNamespaceChange::builder()
                    .description(description)
                    .build()
                    .map_err(|e| build_failed("namespace change", e))?;
                let out = self
                    .client
                    .update_http_namespace()
                    .id(id)
                    .updater_request_id(updater_request_id)
                    .namespace(change)
                    .send()
                    .await
                    .map_err(classify)?;
                operation_id(out.operation_id(), "UpdateHttpNamespace")?
            }
        };
        Ok(op)
    }

    async fn delete_namespace(&self, id: &str) -> Result<String> {
        let out = self
            .client
            .delete_namespace()
            .id(id)
            .send()
            .await
            .map_err(classify)?;
        operation_id(out.operation_id(), "DeleteNamespace")
    }

    async fn get_operation(&self, id: &str) -> Result<Operation> {
        let out = self
            .client
            .get_operation()
            .operation_id(id)
            .send()
            .await
            .map_err(classify)?;
        let op = out
            .operation()
            .ok_or_else(|| ProviderError::NotFound(format!("operation {id}")))?;
        let status = op
            .status()
            .map(|s| s.as_str())
            .unwrap_or("PENDING")
            .parse::<OperationStatus>()?;
        Ok(Operation {
            id: op.id().unwrap_or(id).to_string(),
            status,
            targets: op
                .targets()
                .map(|targets| {
                    targets
                        .iter()
                        .map(|(k, v)| (k.as_str().to_string(), v.clone()))
                        .collect()
                })
                .unwrap_or_default(),
            error_code: op.error_code().map(str::to_string),
            error_message: op.error_message().map(str::to_string),
        })
    }

    async fn tag_resource(&self, arn: &str, tags: &BTreeMap<String, String>) -> Result<()> {
        self.client
            .tag_resource()
            .resource_arn(arn)
            .set_tags(sdk_tags(tags)?)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn untag_resource(&self, arn: &str, keys: &[String]) -> Result<()> {
        self.client
            .untag_resource()
            .resource_arn(arn)
            .set_tag_keys(Some(keys.to_vec()))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }
}
