//! The Cognito Identity calls the IdentityPool adapter makes

use super::crd::{CognitoIdentityProvider, IdentityPoolParameters};
use crate::error::classify;
use async_trait::async_trait;
use aws_sdk_cognitoidentity::types::CognitoIdentityProvider as SdkProvider;
use aws_sdk_cognitoidentity::Client;
use std::collections::{BTreeMap, HashMap};
use stratus_core::error::Result;

/// What DescribeIdentityPool reports
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedIdentityPool {
    pub identity_pool_id: String,
    pub identity_pool_name: String,
    pub allow_unauthenticated_identities: bool,
    pub allow_classic_flow: Option<bool>,
    pub supported_login_providers: BTreeMap<String, String>,
    pub developer_provider_name: Option<String>,
    pub open_id_connect_provider_arns: Vec<String>,
    pub cognito_identity_providers: Vec<CognitoIdentityProvider>,
    pub saml_provider_arns: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

#[async_trait]
pub trait CognitoIdentityApi: Send + Sync {
    /// `NotFound` when the pool does not exist
    async fn describe_identity_pool(&self, id: &str) -> Result<ObservedIdentityPool>;

    /// Returns the pool id AWS assigned
    async fn create_identity_pool(&self, params: &IdentityPoolParameters) -> Result<String>;

    /// Replaces the pool configuration, tags included
    async fn update_identity_pool(&self, id: &str, params: &IdentityPoolParameters) -> Result<()>;

    async fn delete_identity_pool(&self, id: &str) -> Result<()>;
}

/// [`CognitoIdentityApi`] over the AWS SDK
pub struct SdkCognitoIdentity {
    client: Client,
}

impl SdkCognitoIdentity {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn to_hash_map(map: &BTreeMap<String, String>) -> Option<HashMap<String, String>> {
    (!map.is_empty()).then(|| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

fn to_btree_map(map: Option<&HashMap<String, String>>) -> BTreeMap<String, String> {
    map.map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

fn non_empty<T: Clone>(items: &[T]) -> Option<Vec<T>> {
    (!items.is_empty()).then(|| items.to_vec())
}

fn sdk_providers(providers: &[CognitoIdentityProvider]) -> Option<Vec<SdkProvider>> {
    (!providers.is_empty()).then(|| {
        providers
            .iter()
            .map(|p| {
                SdkProvider::builder()
                    .provider_name(&p.provider_name)
                    .client_id(&p.client_id)
                    .set_server_side_token_check(p.server_side_token_check)
                    .build()
            })
            .collect()
    })
}

#[async_trait]
impl CognitoIdentityApi for SdkCognitoIdentity {
    async fn describe_identity_pool(&self, id: &str) -> Result<ObservedIdentityPool> {
        let out = self
            .client
            .describe_identity_pool()
            .identity_pool_id(id)
            .send()
            .await
            .map_err(classify)?;
        Ok(ObservedIdentityPool {
            identity_pool_id: out.identity_pool_id().to_string(),
            identity_pool_name: out.identity_pool_name().to_string(),
            allow_unauthenticated_identities: out.allow_unauthenticated_identities(),
            allow_classic_flow: out.allow_classic_flow(),
            supported_login_providers: to_btree_map(out.supported_login_providers()),
            developer_provider_name: out.developer_provider_name().map(str::to_string),
            open_id_connect_provider_arns: out.open_id_connect_provider_arns().to_vec(),
            cognito_identity_providers: out
                .cognito_identity_providers()
                .iter()
                .map(|p| CognitoIdentityProvider {
                    provider_name: p.provider_name().unwrap_or_default().to_string(),
                    client_id: p.client_id().unwrap_or_default().to_string(),
                    server_side_token_check: p.server_side_token_check(),
                })
                .collect(),
            saml_provider_arns: out.saml_provider_arns().to_vec(),
            tags: to_btree_map(out.identity_pool_tags()),
        })
    }

    async fn create_identity_pool(&self, params: &IdentityPoolParameters) -> Result<String> {
        let out = self
            .client
            .create_identity_pool()
            .identity_pool_name(&params.identity_pool_name)
            .allow_unauthenticated_identities(params.allow_unauthenticated_identities)
            .set_allow_classic_flow(params.allow_classic_flow)
            .set_supported_login_providers(to_hash_map(&params.supported_login_providers))
            .set_developer_provider_name(params.developer_provider_name.clone())
            .set_open_id_connect_provider_arns(non_empty(&params.open_id_connect_provider_arns))
            .set_cognito_identity_providers(sdk_providers(&params.cognito_identity_providers))
            .set_saml_provider_arns(non_empty(&params.saml_provider_arns))
            .set_identity_pool_tags(to_hash_map(&params.tags))
            .send()
            .await
            .map_err(classify)?;
        Ok(out.identity_pool_id().to_string())
    }

    async fn update_identity_pool(&self, id: &str, params: &IdentityPoolParameters) -> Result<()> {
        self.client
            .update_identity_pool()
            .identity_pool_id(id)
            .identity_pool_name(&params.identity_pool_name)
            .allow_unauthenticated_identities(params.allow_unauthenticated_identities)
            .set_allow_classic_flow(params.allow_classic_flow)
            .set_supported_login_providers(to_hash_map(&params.supported_login_providers))
            .set_developer_provider_name(params.developer_provider_name.clone())
            .set_open_id_connect_provider_arns(Some(params.open_id_connect_provider_arns.clone()))
            .set_cognito_identity_providers(Some(
                sdk_providers(&params.cognito_identity_providers).unwrap_or_default(),
            ))
            .set_saml_provider_arns(Some(params.saml_provider_arns.clone()))
            .set_identity_pool_tags(Some(
                params
                    .tags
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_identity_pool(&self, id: &str) -> Result<()> {
        self.client
            .delete_identity_pool()
            .identity_pool_id(id)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }
}
