//! Cloud Map namespaces
//!
//! Create, update and delete answer with an operation id instead of the
//! finished namespace. The id is recorded on the resource and polled in
//! `pre_observe`; a successful create names the namespace through the
//! operation's `NAMESPACE` target.

mod api;
mod crd;

pub use api::{CreateNamespace, ObservedNamespace, SdkServiceDiscovery, ServiceDiscoveryApi};
pub use crd::{
    HTTPNamespace, HTTPNamespaceSpec, NamespaceObservation, NamespaceParameters,
    NamespaceResource, NamespaceStatus, NamespaceType, PrivateDNSNamespace,
    PrivateDNSNamespaceSpec, PrivateDnsNamespaceParameters, PublicDNSNamespace,
    PublicDNSNamespaceSpec,
};

use async_trait::async_trait;
use aws_config::SdkConfig;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use stratus_core::drift::{diff_tags, late_init_string};
use stratus_core::error::{ProviderError, Result, Stage, StageExt};
use stratus_core::external::{
    ExternalClient, ExternalCreation, ExternalDeletion, ExternalObservation, ExternalUpdate,
    HookedClient, Hooks,
};
use stratus_core::operation::{observe_operation, Operation, OperationPoller};
use stratus_core::resource::{external_name, operation_id};
use stratus_core::store::StoreSet;
use tracing::debug;

/// Operation target that carries the namespace id
pub const TARGET_NAMESPACE: &str = "NAMESPACE";

struct Operations<'a>(&'a dyn ServiceDiscoveryApi);

#[async_trait]
impl OperationPoller for Operations<'_> {
    async fn get_operation(&self, id: &str) -> Result<Operation> {
        self.0.get_operation(id).await
    }
}

/// What one observe read about a namespace
#[derive(Debug, Clone)]
pub struct ObservedNamespaceState {
    pub namespace: ObservedNamespace,
    pub tags: BTreeMap<String, String>,
}

/// Hooks shared by the three namespace kinds
pub struct NamespaceHooks<K> {
    api: Arc<dyn ServiceDiscoveryApi>,
    _kind: PhantomData<fn() -> K>,
}

impl<K> NamespaceHooks<K> {
    pub fn new(api: Arc<dyn ServiceDiscoveryApi>) -> Self {
        Self {
            api,
            _kind: PhantomData,
        }
    }
}

fn request_id<K: NamespaceResource>(obj: &K) -> Result<String> {
    obj.uid()
        .ok_or_else(|| ProviderError::Internal(format!("{} has no uid", obj.name_any())))
}

fn description_differs(desired: Option<&str>, observed: Option<&str>) -> bool {
    desired.is_some_and(|d| Some(d) != observed)
}

#[async_trait]
impl<K: NamespaceResource> Hooks<K> for NamespaceHooks<K> {
    type Observed = ObservedNamespaceState;

    async fn pre_observe(&self, obj: &mut K) -> Result<Option<ExternalObservation>> {
        observe_operation(&Operations(self.api.as_ref()), obj, TARGET_NAMESPACE).await
    }

    async fn describe(&self, obj: &K) -> Result<Option<ObservedNamespaceState>> {
        let Some(id) = external_name(obj) else {
            return Ok(None);
        };
        let namespace = match self.api.get_namespace(id).await {
            Ok(ns) => ns,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.at(Stage::GetNamespace)),
        };
        let tags = self
            .api
            .list_tags(&namespace.arn)
            .await
            .stage(Stage::ListTags)?;
        Ok(Some(ObservedNamespaceState { namespace, tags }))
    }

    fn late_initialize(&self, obj: &mut K, observed: &ObservedNamespaceState) -> bool {
        late_init_string(
            &mut obj.namespace_mut().description,
            observed.namespace.description.as_deref(),
        )
    }

    async fn is_up_to_date(&self, obj: &K, observed: &ObservedNamespaceState) -> Result<bool> {
        let p = obj.namespace();
        let description = description_differs(
            p.description.as_deref(),
            observed.namespace.description.as_deref(),
        );
        let tags = diff_tags(&p.tags, &observed.tags);
        Ok(!description && tags.is_empty())
    }

    async fn post_observe(
        &self,
        obj: &mut K,
        observed: &ObservedNamespaceState,
        observation: ExternalObservation,
    ) -> Result<ExternalObservation> {
        let ns = &observed.namespace;
        *obj.observation_mut() = NamespaceObservation {
            id: Some(ns.id.clone()),
            arn: Some(ns.arn.clone()),
            hosted_zone_id: ns.hosted_zone_id.clone(),
            create_date: ns.create_date.clone(),
            operation_id: operation_id(obj).map(str::to_string),
        };
        Ok(observation)
    }

    async fn create(&self, obj: &mut K) -> Result<ExternalCreation> {
        let p = obj.namespace();
        let input = CreateNamespace {
            namespace_type: K::NAMESPACE_TYPE,
            name: p.name.clone(),
            description: p.description.clone(),
            vpc: obj.vpc().map(str::to_string),
            tags: p.tags.clone(),
            creator_request_id: request_id(obj)?,
        };
        let operation = self.api.create_namespace(&input).await?;
        debug!(namespace = %input.name, operation = %operation, "Namespace create submitted");
        Ok(ExternalCreation {
            operation_id: Some(operation),
            ..Default::default()
        })
    }

    async fn update(
        &self,
        obj: &mut K,
        observed: Option<&ObservedNamespaceState>,
    ) -> Result<ExternalUpdate> {
        let described;
        let observed = match observed {
            Some(observed) => observed,
            None => {
                described = self.describe(obj).await?.ok_or_else(|| {
                    ProviderError::NotFound(format!("namespace of {}", obj.name_any()))
                })?;
                &described
            }
        };
        let p = obj.namespace();
        let ns = &observed.namespace;

        let tags = diff_tags(&p.tags, &observed.tags);
        if !tags.remove.is_empty() {
            self.api.untag_resource(&ns.arn, &tags.remove).await?;
        }
        if !tags.add.is_empty() {
            self.api.tag_resource(&ns.arn, &tags.add).await?;
        }

        let mut operation_id = None;
        if let Some(description) = p
            .description
            .as_deref()
            .filter(|d| description_differs(Some(d), ns.description.as_deref()))
        {
            let updater = format!("{}-{}", request_id(obj)?, obj.meta().generation.unwrap_or(0));
            let op = self
                .api
                .update_description(K::NAMESPACE_TYPE, &ns.id, description, &updater)
                .await?;
            debug!(namespace = %ns.id, operation = %op, "Namespace update submitted");
            operation_id = Some(op);
        }
        Ok(ExternalUpdate {
            operation_id,
            ..Default::default()
        })
    }

    async fn delete(
        &self,
        obj: &mut K,
        _observed: Option<&ObservedNamespaceState>,
    ) -> Result<ExternalDeletion> {
        let Some(id) = external_name(obj).map(str::to_string) else {
            return Ok(ExternalDeletion {
                completed: true,
                operation_id: None,
            });
        };
        let operation = self.api.delete_namespace(&id).await?;
        // Confirmed once GetNamespace reports NotFound
        Ok(ExternalDeletion {
            completed: false,
            operation_id: Some(operation),
        })
    }
}

fn client_for<K: NamespaceResource>(sdk: &SdkConfig) -> Box<dyn ExternalClient<K>> {
    let api = SdkServiceDiscovery::new(aws_sdk_servicediscovery::Client::new(sdk));
    Box::new(HookedClient::new(NamespaceHooks::<K>::new(Arc::new(api))))
}

pub fn private_dns_client(
    sdk: &SdkConfig,
    _stores: &StoreSet,
) -> Box<dyn ExternalClient<PrivateDNSNamespace>> {
    client_for(sdk)
}

pub fn public_dns_client(
    sdk: &SdkConfig,
    _stores: &StoreSet,
) -> Box<dyn ExternalClient<PublicDNSNamespace>> {
    client_for(sdk)
}

pub fn http_client(sdk: &SdkConfig, _stores: &StoreSet) -> Box<dyn ExternalClient<HTTPNamespace>> {
    client_for(sdk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use stratus_core::operation::OperationStatus;
    use stratus_core::resource::{operation_id, set_external_name, set_operation_id};

    #[derive(Default)]
    struct FakeCloudMap {
        status: Mutex<Option<OperationStatus>>,
        created: Mutex<Vec<CreateNamespace>>,
        updates: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ServiceDiscoveryApi for FakeCloudMap {
        async fn get_namespace(&self, id: &str) -> Result<ObservedNamespace> {
            Ok(ObservedNamespace {
                id: id.to_string(),
                arn: format!("arn:aws:servicediscovery:us-east-1:123456789012:namespace/{id}"),
                name: "apps".into(),
                description: Some("old".into()),
                ..Default::default()
            })
        }

        async fn list_tags(&self, _arn: &str) -> Result<BTreeMap<String, String>> {
            Ok(BTreeMap::new())
        }

        async fn create_namespace(&self, input: &CreateNamespace) -> Result<String> {
            self.created.lock().push(input.clone());
            Ok("op-create".into())
        }

        async fn update_description(
            &self,
            _namespace_type: NamespaceType,
            id: &str,
            description: &str,
            _updater_request_id: &str,
        ) -> Result<String> {
            self.updates.lock().push((id.to_string(), description.to_string()));
            Ok("op-update".into())
        }

        async fn delete_namespace(&self, _id: &str) -> Result<String> {
            Ok("op-delete".into())
        }

        async fn get_operation(&self, id: &str) -> Result<Operation> {
            let status = self
                .status
                .lock()
                .ok_or_else(|| ProviderError::NotFound(id.to_string()))?;
            Ok(Operation {
                id: id.to_string(),
                status,
                targets: BTreeMap::from([(TARGET_NAMESPACE.to_string(), "ns-abc".to_string())]),
                error_code: None,
                error_message: None,
            })
        }

        async fn tag_resource(&self, _arn: &str, _tags: &BTreeMap<String, String>) -> Result<()> {
            Ok(())
        }

        async fn untag_resource(&self, _arn: &str, _keys: &[String]) -> Result<()> {
            Ok(())
        }
    }

    fn namespace() -> HTTPNamespace {
        let mut ns = HTTPNamespace::new(
            "apps",
            HTTPNamespaceSpec {
                for_provider: NamespaceParameters {
                    region: "us-east-1".into(),
                    name: "apps".into(),
                    ..Default::default()
                },
                resource: Default::default(),
            },
        );
        ns.metadata.uid = Some("uid-1".into());
        ns
    }

    fn hooks(api: &Arc<FakeCloudMap>) -> NamespaceHooks<HTTPNamespace> {
        NamespaceHooks::new(api.clone())
    }

    #[test]
    fn test_description_differs() {
        assert!(!description_differs(None, Some("observed")));
        assert!(description_differs(Some("a"), None));
        assert!(!description_differs(Some("a"), Some("a")));
    }

    #[tokio::test]
    async fn test_create_submits_with_uid() {
        let api = Arc::new(FakeCloudMap::default());
        let mut ns = namespace();
        let created = hooks(&api).create(&mut ns).await.unwrap();

        assert_eq!(created.operation_id.as_deref(), Some("op-create"));
        assert!(created.external_name.is_none());
        let calls = api.created.lock();
        assert_eq!(calls[0].creator_request_id, "uid-1");
        assert_eq!(calls[0].namespace_type, NamespaceType::Http);
        assert_eq!(calls[0].vpc, None);
    }

    #[tokio::test]
    async fn test_pending_create_is_in_progress() {
        let api = Arc::new(FakeCloudMap::default());
        *api.status.lock() = Some(OperationStatus::Pending);
        let mut ns = namespace();
        set_operation_id(&mut ns, "op-create");

        let obs = hooks(&api).pre_observe(&mut ns).await.unwrap().unwrap();
        assert!(obs.pending);
        assert!(!obs.resource_exists);
        assert_eq!(operation_id(&ns), Some("op-create"));
    }

    #[tokio::test]
    async fn test_successful_create_names_namespace() {
        let api = Arc::new(FakeCloudMap::default());
        *api.status.lock() = Some(OperationStatus::Success);
        let mut ns = namespace();
        set_operation_id(&mut ns, "op-create");

        let h = hooks(&api);
        assert!(h.pre_observe(&mut ns).await.unwrap().is_none());
        assert_eq!(external_name(&ns), Some("ns-abc"));
        assert_eq!(operation_id(&ns), None);

        let observed = h.describe(&ns).await.unwrap().unwrap();
        assert!(h.late_initialize(&mut ns, &observed));
        assert_eq!(ns.spec.for_provider.description.as_deref(), Some("old"));
        assert!(h.is_up_to_date(&ns, &observed).await.unwrap());
    }

    #[tokio::test]
    async fn test_description_update_returns_operation() {
        let api = Arc::new(FakeCloudMap::default());
        let mut ns = namespace();
        set_external_name(&mut ns, "ns-abc");
        ns.spec.for_provider.description = Some("new".into());

        let h = hooks(&api);
        let observed = h.describe(&ns).await.unwrap().unwrap();
        assert!(!h.is_up_to_date(&ns, &observed).await.unwrap());

        let updated = h.update(&mut ns, Some(&observed)).await.unwrap();
        assert_eq!(updated.operation_id.as_deref(), Some("op-update"));
        assert_eq!(
            api.updates.lock().as_slice(),
            &[("ns-abc".to_string(), "new".to_string())]
        );
    }

    #[tokio::test]
    async fn test_delete_waits_for_not_found() {
        let api = Arc::new(FakeCloudMap::default());
        let mut ns = namespace();
        set_external_name(&mut ns, "ns-abc");

        let deleted = hooks(&api).delete(&mut ns, None).await.unwrap();
        assert!(!deleted.completed);
        assert_eq!(deleted.operation_id.as_deref(), Some("op-delete"));
    }
}
