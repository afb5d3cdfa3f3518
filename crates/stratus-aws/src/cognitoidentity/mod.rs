//! Cognito identity pools
//!
//! The pool id is only known once CreateIdentityPool returns, so the
//! resource goes through the creation bookkeeping guard: a create whose id
//! was never recorded is not retried blindly.

mod api;
mod crd;

pub use api::{CognitoIdentityApi, ObservedIdentityPool, SdkCognitoIdentity};
pub use crd::{
    CognitoIdentityProvider, IdentityPool, IdentityPoolObservation, IdentityPoolParameters,
    IdentityPoolSpec, IdentityPoolStatus,
};

use async_trait::async_trait;
use aws_config::SdkConfig;
use std::collections::BTreeSet;
use std::sync::Arc;
use stratus_core::drift::{diff_tags, late_init, late_init_string};
use stratus_core::error::{ProviderError, Result};
use stratus_core::external::{
    ExternalClient, ExternalCreation, ExternalDeletion, ExternalObservation, ExternalUpdate,
    HookedClient, Hooks,
};
use stratus_core::resource::external_name;
use stratus_core::store::StoreSet;
use tracing::{debug, info};

fn same_set<T: Ord>(a: &[T], b: &[T]) -> bool {
    a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
}

/// Names of the parameters that differ from the observed pool
pub fn drifted_fields(p: &IdentityPoolParameters, o: &ObservedIdentityPool) -> Vec<&'static str> {
    let mut out = Vec::new();
    let mut check = |differs: bool, field: &'static str| {
        if differs {
            out.push(field);
        }
    };
    check(p.identity_pool_name != o.identity_pool_name, "identityPoolName");
    check(
        p.allow_unauthenticated_identities != o.allow_unauthenticated_identities,
        "allowUnauthenticatedIdentities",
    );
    check(
        p.allow_classic_flow.is_some() && p.allow_classic_flow != o.allow_classic_flow,
        "allowClassicFlow",
    );
    check(
        p.supported_login_providers != o.supported_login_providers,
        "supportedLoginProviders",
    );
    check(
        p.developer_provider_name.is_some()
            && p.developer_provider_name != o.developer_provider_name,
        "developerProviderName",
    );
    check(
        !same_set(&p.open_id_connect_provider_arns, &o.open_id_connect_provider_arns),
        "openIdConnectProviderArns",
    );
    check(
        !same_set(&p.cognito_identity_providers, &o.cognito_identity_providers),
        "cognitoIdentityProviders",
    );
    check(
        !same_set(&p.saml_provider_arns, &o.saml_provider_arns),
        "samlProviderArns",
    );
    check(!diff_tags(&p.tags, &o.tags).is_empty(), "tags");
    out
}

/// Hooks for the IdentityPool kind
pub struct IdentityPoolHooks {
    api: Arc<dyn CognitoIdentityApi>,
}

impl IdentityPoolHooks {
    pub fn new(api: Arc<dyn CognitoIdentityApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Hooks<IdentityPool> for IdentityPoolHooks {
    type Observed = ObservedIdentityPool;

    async fn describe(&self, pool: &IdentityPool) -> Result<Option<ObservedIdentityPool>> {
        let Some(id) = external_name(pool) else {
            return Ok(None);
        };
        match self.api.describe_identity_pool(id).await {
            Ok(observed) => Ok(Some(observed)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn late_initialize(&self, pool: &mut IdentityPool, observed: &ObservedIdentityPool) -> bool {
        let p = &mut pool.spec.for_provider;
        let mut changed = late_init(&mut p.allow_classic_flow, observed.allow_classic_flow);
        changed |= late_init_string(
            &mut p.developer_provider_name,
            observed.developer_provider_name.as_deref(),
        );
        changed
    }

    async fn is_up_to_date(
        &self,
        pool: &IdentityPool,
        observed: &ObservedIdentityPool,
    ) -> Result<bool> {
        let drifted = drifted_fields(&pool.spec.for_provider, observed);
        if !drifted.is_empty() {
            debug!(pool = %observed.identity_pool_id, ?drifted, "Identity pool drifted");
        }
        Ok(drifted.is_empty())
    }

    async fn post_observe(
        &self,
        pool: &mut IdentityPool,
        observed: &ObservedIdentityPool,
        observation: ExternalObservation,
    ) -> Result<ExternalObservation> {
        pool.status.get_or_insert_with(Default::default).at_provider = IdentityPoolObservation {
            identity_pool_id: Some(observed.identity_pool_id.clone()),
        };
        Ok(observation)
    }

    async fn create(&self, pool: &mut IdentityPool) -> Result<ExternalCreation> {
        let id = self
            .api
            .create_identity_pool(&pool.spec.for_provider)
            .await?;
        info!(pool = %id, "Identity pool created");
        Ok(ExternalCreation {
            external_name: Some(id),
            ..Default::default()
        })
    }

    async fn update(
        &self,
        pool: &mut IdentityPool,
        _observed: Option<&ObservedIdentityPool>,
    ) -> Result<ExternalUpdate> {
        let id = external_name(pool)
            .ok_or_else(|| ProviderError::Internal("identity pool has no id".to_string()))?;
        self.api
            .update_identity_pool(id, &pool.spec.for_provider)
            .await?;
        Ok(ExternalUpdate::default())
    }

    async fn delete(
        &self,
        pool: &mut IdentityPool,
        _observed: Option<&ObservedIdentityPool>,
    ) -> Result<ExternalDeletion> {
        if let Some(id) = external_name(pool) {
            self.api.delete_identity_pool(id).await?;
        }
        Ok(ExternalDeletion {
            completed: true,
            operation_id: None,
        })
    }
}

/// External client for IdentityPools over an SDK config
pub fn client(sdk: &SdkConfig, _stores: &StoreSet) -> Box<dyn ExternalClient<IdentityPool>> {
    let api = SdkCognitoIdentity::new(aws_sdk_cognitoidentity::Client::new(sdk));
    Box::new(HookedClient::new(IdentityPoolHooks::new(Arc::new(api))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn params() -> IdentityPoolParameters {
        IdentityPoolParameters {
            region: "us-east-1".into(),
            identity_pool_name: "mobile".into(),
            open_id_connect_provider_arns: vec![
                "arn:aws:iam::123456789012:oidc-provider/a".into(),
                "arn:aws:iam::123456789012:oidc-provider/b".into(),
            ],
            tags: BTreeMap::from([("team".to_string(), "apps".to_string())]),
            ..Default::default()
        }
    }

    fn observed() -> ObservedIdentityPool {
        ObservedIdentityPool {
            identity_pool_id: "us-east-1:1111".into(),
            identity_pool_name: "mobile".into(),
            allow_classic_flow: Some(false),
            open_id_connect_provider_arns: vec![
                "arn:aws:iam::123456789012:oidc-provider/b".into(),
                "arn:aws:iam::123456789012:oidc-provider/a".into(),
            ],
            tags: BTreeMap::from([("team".to_string(), "apps".to_string())]),
            ..Default::default()
        }
    }

    #[test]
    fn test_in_sync() {
        assert!(drifted_fields(&params(), &observed()).is_empty());
    }

    #[test]
    fn test_drift_is_named() {
        let mut p = params();
        p.allow_unauthenticated_identities = true;
        p.tags.insert("env".into(), "prod".into());
        assert_eq!(
            drifted_fields(&p, &observed()),
            vec!["allowUnauthenticatedIdentities", "tags"]
        );
    }

    #[test]
    fn test_late_init_fills_classic_flow() {
        let hooks = IdentityPoolHooks::new(Arc::new(NoApi));
        let mut pool = IdentityPool::new(
            "mobile",
            IdentityPoolSpec {
                for_provider: params(),
                resource: Default::default(),
            },
        );
        assert!(hooks.late_initialize(&mut pool, &observed()));
        assert_eq!(pool.spec.for_provider.allow_classic_flow, Some(false));
        assert!(!hooks.late_initialize(&mut pool, &observed()));
    }

    struct NoApi;

    #[async_trait]
    impl CognitoIdentityApi for NoApi {
        async fn describe_identity_pool(&self, _: &str) -> Result<ObservedIdentityPool> {
            unreachable!()
        }
        async fn create_identity_pool(&self, _: &IdentityPoolParameters) -> Result<String> {
            unreachable!()
        }
        async fn update_identity_pool(&self, _: &str, _: &IdentityPoolParameters) -> Result<()> {
            unreachable!()
        }
        async fn delete_identity_pool(&self, _: &str) -> Result<()> {
            unreachable!()
        }
    }
}
