//! AWS client factory and connectors
//!
//! [`ClientFactory`] turns a ProviderConfig name and a region into an
//! `aws_config::SdkConfig`. Built configs are cached by config name and
//! region together with the credential fingerprint; a fingerprint change
//! (rotated secret, new role) rebuilds the entry and swaps it into a fresh
//! map so readers never block on a rebuild.
//!
//! [`AwsConnector`] is the [`Connector`] handed to the reconciler for a kind.
//! It validates the resource, asks the factory for the SDK config and builds
//! the kind's hooks over service clients made from it. Validation is skipped
//! while deleting.

use crate::config::{self, CredentialSource, ResolvedConfig};
use crate::error::validation_failed;
use async_trait::async_trait;
use aws_config::sts::AssumeRoleProvider;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::Credentials;
use parking_lot::RwLock;
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use stratus_core::error::{ProviderError, Result};
use stratus_core::external::{Connector, ExternalClient};
use stratus_core::resource::ManagedResource;
use stratus_core::store::StoreSet;
use tracing::{debug, info};
use validator::Validate;

const SESSION_NAME: &str = "stratus-provider";
const CREDENTIALS_PROVIDER: &str = "stratus-provider-config";

/// A managed resource backed by an AWS object
pub trait AwsResource: ManagedResource {
    /// Region the external object lives in
    fn region(&self) -> &str;

    /// Check the desired state before any AWS call
    fn validate_parameters(&self) -> Result<()>;
}

/// Run validator rules and fold the field errors into one error
pub fn validate_fields(params: &impl Validate) -> Result<()> {
    params.validate().map_err(|e| validation_failed(&e))
}

/// Configuration for [`ClientFactory`]
#[derive(Debug, Clone)]
pub struct ClientFactoryConfig {
    /// Upper bound for one AWS operation, retries included
    pub operation_timeout: Duration,
}

impl Default for ClientFactoryConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
struct CachedConfig {
    fingerprint: String,
    sdk: SdkConfig,
}

type CacheKey = (String, String);

/// Builds and caches region-scoped SDK configs per ProviderConfig
pub struct ClientFactory {
    stores: StoreSet,
    config: ClientFactoryConfig,
    cache: RwLock<Arc<HashMap<CacheKey, CachedConfig>>>,
}

impl ClientFactory {
    pub fn new(stores: StoreSet, config: ClientFactoryConfig) -> Self {
        Self {
            stores,
            config,
            cache: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Stores used to read ProviderConfigs, their secrets and resource inputs
    pub fn stores(&self) -> &StoreSet {
        &self.stores
    }

    /// Number of cached configs
    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }

    /// SDK config for `provider_config` in `region`
    pub async fn sdk_config(&self, provider_config: &str, region: &str) -> Result<SdkConfig> {
        let resolved = config::resolve(&self.stores, provider_config).await?;
        let key = (resolved.name.clone(), region.to_string());

        let hit = self
            .cache
            .read()
            .get(&key)
            .filter(|c| c.fingerprint == resolved.fingerprint)
            .map(|c| c.sdk.clone());
        if let Some(sdk) = hit {
            return Ok(sdk);
        }

        let sdk = self.build(&resolved, region).await?;
        {
            let mut cache = self.cache.write();
            let mut next = HashMap::clone(&cache);
            let replaced = next
                .insert(
                    key,
                    CachedConfig {
                        fingerprint: resolved.fingerprint.clone(),
                        sdk: sdk.clone(),
                    },
                )
                .is_some();
            *cache = Arc::new(next);
            info!(
                provider_config = %resolved.name,
                region = %region,
                replaced,
                "Built AWS client config"
            );
        }
        metrics::counter!("stratus_aws_client_builds_total").increment(1);
        Ok(sdk)
    }

    async fn build(&self, resolved: &ResolvedConfig, region: &str) -> Result<SdkConfig> {
        let region = Region::new(region.to_string());
        let timeouts = TimeoutConfig::builder()
            .operation_timeout(self.config.operation_timeout)
            .build();
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(region.clone())
            .timeout_config(timeouts);
        if let Some(endpoint) = &resolved.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        match &resolved.credentials {
            CredentialSource::Static(creds) => {
                debug!(provider_config = %resolved.name, access_key_id = %creds.access_key_id, "Using static credentials");
                loader = loader.credentials_provider(Credentials::new(
                    creds.access_key_id.clone(),
                    creds.secret_access_key.expose_secret(),
                    creds
                        .session_token
                        .as_ref()
                        .map(|t| t.expose_secret().to_string()),
                    None,
                    CREDENTIALS_PROVIDER,
                ));
            }
            CredentialSource::Ambient => {
                debug!(provider_config = %resolved.name, "Using the default credential chain");
            }
            CredentialSource::AssumeRole {
                role_arn,
                external_id,
            } => {
                debug!(provider_config = %resolved.name, role_arn = %role_arn, "Assuming role");
                let base = aws_config::defaults(BehaviorVersion::latest())
                    .region(region.clone())
                    .load()
                    .await;
                let mut builder = AssumeRoleProvider::builder(role_arn.clone())
                    .session_name(SESSION_NAME)
                    .region(region)
                    .configure(&base);
                if let Some(external_id) = external_id {
                    builder = builder.external_id(external_id.clone());
                }
                loader = loader.credentials_provider(builder.build().await);
            }
        }
        Ok(loader.load().await)
    }
}

/// Builds the external client of kind `K` over an SDK config
pub type ClientBuilder<K> = fn(&SdkConfig, &StoreSet) -> Box<dyn ExternalClient<K>>;

/// [`Connector`] that builds real AWS clients through a [`ClientFactory`]
pub struct AwsConnector<K> {
    factory: Arc<ClientFactory>,
    build: ClientBuilder<K>,
}

impl<K> AwsConnector<K> {
    pub fn new(factory: Arc<ClientFactory>, build: ClientBuilder<K>) -> Self {
        Self { factory, build }
    }
}

#[async_trait]
impl<K: AwsResource> Connector<K> for AwsConnector<K> {
    fn validate(&self, obj: &K) -> Result<()> {
        obj.validate_parameters()
    }

    async fn connect(&self, obj: &K) -> Result<Box<dyn ExternalClient<K>>> {
        if obj.region().is_empty() {
            return Err(ProviderError::Validation(
                "spec.forProvider.region is required".into(),
            ));
        }
        let sdk = self
            .factory
            .sdk_config(obj.provider_config_name(), obj.region())
            .await?;
        Ok((self.build)(&sdk, self.factory.stores()))
    }
}

type MakeClient<K> = dyn Fn() -> Box<dyn ExternalClient<K>> + Send + Sync;

/// [`Connector`] over a fixed set of service APIs, e.g. recording fakes
pub struct StaticConnector<K> {
    make: Box<MakeClient<K>>,
}

impl<K> StaticConnector<K> {
    pub fn new(make: impl Fn() -> Box<dyn ExternalClient<K>> + Send + Sync + 'static) -> Self {
        Self {
            make: Box::new(make),
        }
    }
}

#[async_trait]
impl<K: AwsResource> Connector<K> for StaticConnector<K> {
    fn validate(&self, obj: &K) -> Result<()> {
        obj.validate_parameters()
    }

    async fn connect(&self, _obj: &K) -> Result<Box<dyn ExternalClient<K>>> {
        Ok((self.make)())
    }
}
