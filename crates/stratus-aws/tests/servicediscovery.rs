//! Cloud Map namespace reconcile-loop tests
//!
//! Namespaces are created, updated and deleted through asynchronous
//! operations; these tests walk the operation id through its lifecycle.
//!
//! Run with: cargo test -p stratus-aws --test servicediscovery -- --nocapture

mod common;

use anyhow::Result;
use async_trait::async_trait;
use common::*;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use stratus_aws::prelude::*;
use stratus_aws::servicediscovery::{
    CreateNamespace, NamespaceHooks, NamespaceParameters, NamespaceType, ObservedNamespace,
    PrivateDNSNamespaceSpec, PrivateDnsNamespaceParameters, ServiceDiscoveryApi,
};
use tracing::info;

const NAMESPACE_ID: &str = "ns-abc";

/// Cloud Map with operations that finish only when the test says so
#[derive(Default)]
struct FakeCloudMap {
    namespaces: Mutex<BTreeMap<String, ObservedNamespace>>,
    operations: Mutex<BTreeMap<String, Operation>>,
    created: Mutex<Vec<CreateNamespace>>,
    descriptions: Mutex<Vec<(String, String, String)>>,
}

impl FakeCloudMap {
    fn submit(&self, id: &str, targets: BTreeMap<String, String>) -> String {
        self.operations.lock().insert(
            id.to_string(),
            Operation {
                id: id.to_string(),
                status: OperationStatus::Pending,
                targets,
                error_code: None,
                error_message: None,
            },
        );
        id.to_string()
    }

    fn finish(&self, id: &str, status: OperationStatus) {
        if let Some(op) = self.operations.lock().get_mut(id) {
            op.status = status;
        }
    }
}

#[async_trait]
impl ServiceDiscoveryApi for FakeCloudMap {
    async fn get_namespace(&self, id: &str) -> stratus_core::error::Result<ObservedNamespace> {
        self.namespaces
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("namespace {id}")))
    }

    async fn list_tags(&self, _arn: &str) -> stratus_core::error::Result<BTreeMap<String, String>> {
        Ok(BTreeMap::new())
    }

    async fn create_namespace(&self, input: &CreateNamespace) -> stratus_core::error::Result<String> {
        self.created.lock().push(input.clone());
        Ok(self.submit(
            "op-create",
            BTreeMap::from([("NAMESPACE".to_string(), NAMESPACE_ID.to_string())]),
        ))
    }

    async fn update_description(
        &self,
        _namespace_type: NamespaceType,
        id: &str,
        description: &str,
        updater_request_id: &str,
    ) -> stratus_core::error::Result<String> {
        self.descriptions.lock().push((
            id.to_string(),
            description.to_string(),
            updater_request_id.to_string(),
        ));
        if let Some(ns) = self.namespaces.lock().get_mut(id) {
            ns.description = Some(description.to_string());
        }
        Ok(self.submit("op-update", BTreeMap::new()))
    }

    async fn delete_namespace(&self, _id: &str) -> stratus_core::error::Result<String> {
        Ok(self.submit("op-delete", BTreeMap::new()))
    }

    async fn get_operation(&self, id: &str) -> stratus_core::error::Result<Operation> {
        self.operations
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("operation {id}")))
    }

    async fn tag_resource(
        &self,
        _arn: &str,
        _tags: &BTreeMap<String, String>,
    ) -> stratus_core::error::Result<()> {
        Ok(())
    }

    async fn untag_resource(&self, _arn: &str, _keys: &[String]) -> stratus_core::error::Result<()> {
        Ok(())
    }
}

fn namespace(name: &str) -> PrivateDNSNamespace {
    PrivateDNSNamespace::new(
        name,
        PrivateDNSNamespaceSpec {
            for_provider: PrivateDnsNamespaceParameters {
                namespace: NamespaceParameters {
                    region: "us-east-1".into(),
                    name: "internal.example.com".into(),
                    ..Default::default()
                },
                vpc: "vpc-123".into(),
            },
            resource: Default::default(),
        },
    )
}

fn setup(
    api: Arc<FakeCloudMap>,
) -> (Harness<PrivateDNSNamespace>, Reconciler<PrivateDNSNamespace>) {
    let harness = Harness::<PrivateDNSNamespace>::new();
    let connector = StaticConnector::new(move || {
        Box::new(HookedClient::new(NamespaceHooks::<PrivateDNSNamespace>::new(
            api.clone(),
        ))) as Box<dyn ExternalClient<PrivateDNSNamespace>>
    });
    let reconciler = harness.reconciler(connector);
    (harness, reconciler)
}

/// Operation id mirrored into status.atProvider
fn observed_operation(harness: &Harness<PrivateDNSNamespace>, name: &str) -> Option<String> {
    harness
        .get(name)
        .status
        .and_then(|s| s.at_provider.operation_id)
}

/// Create goes pending, then names the namespace from the operation target
#[tokio::test]
async fn test_namespace_async_create() -> Result<()> {
    init_tracing();

    let api = Arc::new(FakeCloudMap::default());
    let (harness, reconciler) = setup(api.clone());
    harness.objects.create(namespace("internal"))?;

    assert_eq!(reconciler.reconcile("internal").await, SHORT);
    {
        let created = api.created.lock();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].namespace_type, NamespaceType::PrivateDns);
        assert_eq!(created[0].vpc.as_deref(), Some("vpc-123"));
        assert_eq!(created[0].creator_request_id, "uid-internal");
    }
    let ns = harness.get("internal");
    assert_eq!(operation_id(&ns), Some("op-create"));
    assert_eq!(external_name(&ns), None);
    assert_eq!(observed_operation(&harness, "internal").as_deref(), Some("op-create"));
    info!("Namespace create submitted");

    // Still running: reported as creating, nothing resubmitted
    assert_eq!(reconciler.reconcile("internal").await, SHORT);
    assert_eq!(api.created.lock().len(), 1);
    assert_eq!(harness.ready("internal").unwrap().reason, "Creating");

    api.namespaces.lock().insert(
        NAMESPACE_ID.to_string(),
        ObservedNamespace {
            id: NAMESPACE_ID.to_string(),
            arn: format!("arn:aws:servicediscovery:us-east-1:123456789012:namespace/{NAMESPACE_ID}"),
            name: "internal.example.com".into(),
            description: Some("managed".into()),
            hosted_zone_id: Some("Z123".into()),
            create_date: None,
        },
    );
    api.finish("op-create", OperationStatus::Success);

    assert_eq!(reconciler.reconcile("internal").await, POLL);
    let ns = harness.get("internal");
    assert_eq!(external_name(&ns), Some(NAMESPACE_ID));
    assert_eq!(operation_id(&ns), None);
    assert_eq!(observed_operation(&harness, "internal"), None);
    assert_eq!(
        ns.spec.for_provider.namespace.description.as_deref(),
        Some("managed")
    );
    let at_provider = &ns.status.as_ref().unwrap().at_provider;
    assert_eq!(at_provider.hosted_zone_id.as_deref(), Some("Z123"));
    assert_eq!(harness.ready("internal").unwrap().reason, "Available");

    info!("Namespace async create test passed");
    Ok(())
}

/// A description change submits an update operation; deletion waits for
/// the namespace to disappear
#[tokio::test]
async fn test_namespace_update_and_delete() -> Result<()> {
    init_tracing();

    let api = Arc::new(FakeCloudMap::default());
    let (harness, reconciler) = setup(api.clone());
    api.namespaces.lock().insert(
        NAMESPACE_ID.to_string(),
        ObservedNamespace {
            id: NAMESPACE_ID.to_string(),
            arn: format!("arn:aws:servicediscovery:us-east-1:123456789012:namespace/{NAMESPACE_ID}"),
            name: "internal.example.com".into(),
            description: Some("old".into()),
            hosted_zone_id: None,
            create_date: None,
        },
    );
    let mut adopted = namespace("internal");
    set_external_name(&mut adopted, NAMESPACE_ID);
    adopted.spec.for_provider.namespace.description = Some("new".into());
    harness.objects.create(adopted)?;

    assert_eq!(reconciler.reconcile("internal").await, SHORT);
    assert_eq!(
        api.descriptions.lock().clone(),
        vec![(
            NAMESPACE_ID.to_string(),
            "new".to_string(),
            "uid-internal-1".to_string()
        )]
    );
    assert_eq!(operation_id(&harness.get("internal")), Some("op-update"));
    assert_eq!(observed_operation(&harness, "internal").as_deref(), Some("op-update"));

    // The update is in flight but the namespace still exists
    assert_eq!(reconciler.reconcile("internal").await, SHORT);
    assert_eq!(harness.ready("internal").unwrap().reason, "Unavailable");

    api.finish("op-update", OperationStatus::Success);
    assert_eq!(reconciler.reconcile("internal").await, POLL);
    assert_eq!(operation_id(&harness.get("internal")), None);
    assert_eq!(api.descriptions.lock().len(), 1);
    assert_eq!(observed_operation(&harness, "internal"), None);

    harness.objects.delete("internal")?;
    assert_eq!(reconciler.reconcile("internal").await, SHORT);
    assert_eq!(operation_id(&harness.get("internal")), Some("op-delete"));
    assert_eq!(observed_operation(&harness, "internal").as_deref(), Some("op-delete"));

    assert_eq!(reconciler.reconcile("internal").await, SHORT);
    assert_eq!(harness.ready("internal").unwrap().reason, "Deleting");

    api.namespaces.lock().clear();
    api.finish("op-delete", OperationStatus::Success);
    assert_eq!(reconciler.reconcile("internal").await, Outcome::Forget);
    assert!(harness.objects.snapshot("internal").is_none());

    info!("Namespace update and delete test passed");
    Ok(())
}

/// A failed create leaves the resource unnamed and unavailable, and
/// deleting it releases the finalizer without touching AWS
#[tokio::test]
async fn test_failed_create_then_delete() -> Result<()> {
    init_tracing();

    let api = Arc::new(FakeCloudMap::default());
    let (harness, reconciler) = setup(api.clone());
    harness.objects.create(namespace("internal"))?;

    assert_eq!(reconciler.reconcile("internal").await, SHORT);
    api.finish("op-create", OperationStatus::Fail);

    assert_eq!(reconciler.reconcile("internal").await, Outcome::RateLimited);
    let ns = harness.get("internal");
    assert_eq!(external_name(&ns), None);
    let ready = harness.ready("internal").unwrap();
    assert_eq!(ready.status, "False");
    assert_eq!(ready.reason, "Unavailable");
    assert!(ready.message.contains("op-create failed"));
    assert_eq!(harness.synced("internal").unwrap().status, "False");

    harness.objects.delete("internal")?;
    assert_eq!(reconciler.reconcile("internal").await, Outcome::Forget);
    assert!(harness.objects.snapshot("internal").is_none());
    assert_eq!(api.created.lock().len(), 1);

    info!("Namespace failed create test passed");
    Ok(())
}
