//! Managed resource model
//!
//! Every AWS kind is a cluster-scoped custom resource whose spec carries a
//! `forProvider` block plus the common [`ResourceSpec`] fields, and whose
//! status carries an `atProvider` block plus the common [`ResourceStatus`].
//! The AWS-side identifier lives in the `crossplane.io/external-name`
//! annotation.

use crate::conditions::Condition;
use chrono::{DateTime, Utc};
use kube::{Resource, ResourceExt};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Annotation holding the AWS-side identifier
pub const ANNOTATION_EXTERNAL_NAME: &str = "crossplane.io/external-name";

/// Annotation holding an in-flight asynchronous operation handle
pub const ANNOTATION_OPERATION_ID: &str = "stratus.dev/operation-id";

/// Set right before the create call is issued
pub const ANNOTATION_CREATE_PENDING: &str = "stratus.dev/external-create-pending";

/// Set once the create call returned successfully
pub const ANNOTATION_CREATE_SUCCEEDED: &str = "stratus.dev/external-create-succeeded";

/// Set when the create call returned an error
pub const ANNOTATION_CREATE_FAILED: &str = "stratus.dev/external-create-failed";

/// Finalizer shared by all managed-resource controllers
pub const FINALIZER_NAME: &str = "finalizer.managedresource.stratus.dev";

/// What happens to the external object when the managed resource is deleted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum DeletionPolicy {
    /// Delete the external object
    #[default]
    Delete,
    /// Leave the external object in place
    Orphan,
}

/// Whether a reference must resolve
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ResolutionPolicy {
    #[default]
    Required,
    Optional,
}

/// When a reference is resolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ResolvePolicy {
    /// Only when the value field is empty
    #[default]
    IfNotPresent,
    /// On every reconcile
    Always,
}

/// Policies applied to a reference or selector
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReferencePolicy {
    #[serde(default)]
    pub resolution: ResolutionPolicy,

    #[serde(default)]
    pub resolve: ResolvePolicy,
}

/// Reference to another resource by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    /// Name of the referenced object
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<ReferencePolicy>,
}

impl Reference {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: None,
        }
    }

    pub fn is_optional(&self) -> bool {
        self.policy
            .as_ref()
            .is_some_and(|p| p.resolution == ResolutionPolicy::Optional)
    }

    pub fn resolve_always(&self) -> bool {
        self.policy
            .as_ref()
            .is_some_and(|p| p.resolve == ResolvePolicy::Always)
    }
}

/// Select another resource by labels
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    /// Labels that the selected object must carry
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<ReferencePolicy>,
}

impl Selector {
    pub fn is_optional(&self) -> bool {
        self.policy
            .as_ref()
            .is_some_and(|p| p.resolution == ResolutionPolicy::Optional)
    }

    /// True if the labels satisfy every `matchLabels` entry
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|l| l == v))
    }
}

/// Reference to a Kubernetes Secret
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    pub name: String,
    /// Empty selects the publisher's default namespace
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

/// Reference to a single key of a Kubernetes Secret
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeySelector {
    pub name: String,
    pub namespace: String,
    pub key: String,
}

/// Spec fields shared by every managed resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    /// ProviderConfig holding credentials; `default` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config_ref: Option<Reference>,

    #[serde(default)]
    pub deletion_policy: DeletionPolicy,

    /// Secret that receives connection details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_connection_secret_to_ref: Option<SecretReference>,
}

/// Status fields shared by every managed resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A cluster-scoped custom resource that represents one external object
pub trait ManagedResource:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn resource_spec(&self) -> &ResourceSpec;

    fn resource_status(&self) -> Option<&ResourceStatus>;

    /// Mutable status, created on first access
    fn resource_status_mut(&mut self) -> &mut ResourceStatus;

    /// Whether metadata.name doubles as the AWS name when no external name is set.
    ///
    /// Kinds whose identifier is assigned by AWS return false.
    fn name_as_external_name() -> bool {
        true
    }

    fn conditions(&self) -> &[Condition] {
        self.resource_status()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    fn deletion_policy(&self) -> DeletionPolicy {
        self.resource_spec().deletion_policy
    }

    fn provider_config_name(&self) -> &str {
        self.resource_spec()
            .provider_config_ref
            .as_ref()
            .map(|r| r.name.as_str())
            .unwrap_or("default")
    }

    fn connection_secret_ref(&self) -> Option<&SecretReference> {
        self.resource_spec().write_connection_secret_to_ref.as_ref()
    }
    /// Mirror the in-flight operation id into `status.atProvider`. Only kinds
    /// with asynchronous operations keep it there.
    fn set_observed_operation_id(&mut self, _id: Option<String>) {}
}

fn annotation<'a, K: Resource>(obj: &'a K, key: &str) -> Option<&'a str> {
    obj.meta()
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

fn set_annotation<K: Resource>(obj: &mut K, key: &str, value: impl Into<String>) {
    obj.meta_mut()
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.into());
}

fn remove_annotation<K: Resource>(obj: &mut K, key: &str) {
    if let Some(annotations) = obj.meta_mut().annotations.as_mut() {
        annotations.remove(key);
    }
}

/// The AWS-side identifier, if recorded
pub fn external_name<K: Resource>(obj: &K) -> Option<&str> {
    annotation(obj, ANNOTATION_EXTERNAL_NAME)
}

pub fn set_external_name<K: Resource>(obj: &mut K, name: impl Into<String>) {
    set_annotation(obj, ANNOTATION_EXTERNAL_NAME, name)
}

/// The in-flight operation handle, if any
pub fn operation_id<K: Resource>(obj: &K) -> Option<&str> {
    annotation(obj, ANNOTATION_OPERATION_ID)
}

pub fn set_operation_id<K: Resource>(obj: &mut K, id: impl Into<String>) {
    set_annotation(obj, ANNOTATION_OPERATION_ID, id)
}

pub fn clear_operation_id<K: Resource>(obj: &mut K) {
    remove_annotation(obj, ANNOTATION_OPERATION_ID)
}

pub fn set_create_pending<K: Resource>(obj: &mut K, at: DateTime<Utc>) {
    set_annotation(obj, ANNOTATION_CREATE_PENDING, at.to_rfc3339())
}

pub fn set_create_succeeded<K: Resource>(obj: &mut K, at: DateTime<Utc>) {
    set_annotation(obj, ANNOTATION_CREATE_SUCCEEDED, at.to_rfc3339())
}

pub fn set_create_failed<K: Resource>(obj: &mut K, at: DateTime<Utc>) {
    set_annotation(obj, ANNOTATION_CREATE_FAILED, at.to_rfc3339())
}

fn annotation_time<K: Resource>(obj: &K, key: &str) -> Option<DateTime<Utc>> {
    annotation(obj, key)
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// True if a create was started but neither success nor failure was recorded after it
pub fn create_incomplete<K: Resource>(obj: &K) -> bool {
    let Some(pending) = annotation_time(obj, ANNOTATION_CREATE_PENDING) else {
        return false;
    };
    let after = |key| annotation_time(obj, key).is_some_and(|t| t >= pending);
    !after(ANNOTATION_CREATE_SUCCEEDED) && !after(ANNOTATION_CREATE_FAILED)
}

pub fn is_being_deleted<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

/// Returns true if the finalizer was added
pub fn add_finalizer<K: Resource>(obj: &mut K, finalizer: &str) -> bool {
    if has_finalizer(obj, finalizer) {
        return false;
    }
    obj.meta_mut()
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(finalizer.to_string());
    true
}

/// Returns true if the finalizer was removed
pub fn remove_finalizer<K: Resource>(obj: &mut K, finalizer: &str) -> bool {
    let Some(finalizers) = obj.meta_mut().finalizers.as_mut() else {
        return false;
    };
    let before = finalizers.len();
    finalizers.retain(|f| f != finalizer);
    before != finalizers.len()
}

/// Implement [`ManagedResource`] for a CRD root whose spec has a flattened
/// `resource: ResourceSpec` and whose status has a flattened
/// `resource: ResourceStatus`.
#[macro_export]
macro_rules! managed_resource {
    (@impl $kind:ty, $status:ty, $name_as_external_name:expr, { $($extra:tt)* }) => {
        impl $crate::resource::ManagedResource for $kind {
            fn resource_spec(&self) -> &$crate::resource::ResourceSpec {
                &self.spec.resource
            }

            fn resource_status(&self) -> Option<&$crate::resource::ResourceStatus> {
                self.status.as_ref().map(|s| &s.resource)
            }

            fn resource_status_mut(&mut self) -> &mut $crate::resource::ResourceStatus {
                &mut self
                    .status
                    .get_or_insert_with(<$status as ::std::default::Default>::default)
                    .resource
            }

            fn name_as_external_name() -> bool {
                $name_as_external_name
            }

            $($extra)*
        }
    };
    ($kind:ty, $status:ty) => {
        $crate::managed_resource!($kind, $status, true);
    };
    ($kind:ty, $status:ty, $name_as_external_name:expr, async_operations) => {
        $crate::managed_resource!(@impl $kind, $status, $name_as_external_name, {
            fn set_observed_operation_id(&mut self, id: ::std::option::Option<::std::string::String>) {
                self.status
                    .get_or_insert_with(<$status as ::std::default::Default>::default)
                    .at_provider
                    .operation_id = id;
            }
        });
    };
    ($kind:ty, $status:ty, $name_as_external_name:expr) => {
        $crate::managed_resource!(@impl $kind, $status, $name_as_external_name, {});
    };
}


#[cfg(test)]
mod tests {
    use super::testing::widget;
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_external_name_roundtrip() {
        let mut w = widget("orders");
        assert_eq!(external_name(&w), None);
        set_external_name(&mut w, "orders-queue");
        assert_eq!(external_name(&w), Some("orders-queue"));
    }

    #[test]
    fn test_empty_external_name_is_unset() {
        let mut w = widget("orders");
        set_external_name(&mut w, "");
        assert_eq!(external_name(&w), None);
    }

    #[test]
    fn test_operation_id() {
        let mut w = widget("ns");
        set_operation_id(&mut w, "op-1");
        assert_eq!(operation_id(&w), Some("op-1"));
        clear_operation_id(&mut w);
        assert_eq!(operation_id(&w), None);
    }

    #[test]
    fn test_finalizers() {
        let mut w = widget("a");
        assert!(add_finalizer(&mut w, FINALIZER_NAME));
        assert!(!add_finalizer(&mut w, FINALIZER_NAME));
        assert!(has_finalizer(&w, FINALIZER_NAME));
        assert!(remove_finalizer(&mut w, FINALIZER_NAME));
        assert!(!remove_finalizer(&mut w, FINALIZER_NAME));
    }

    #[test]
    fn test_create_incomplete() {
        let now = Utc::now();
        let mut w = widget("pool");
        assert!(!create_incomplete(&w));

        set_create_pending(&mut w, now);
        assert!(create_incomplete(&w));

        set_create_succeeded(&mut w, now + Duration::seconds(1));
        assert!(!create_incomplete(&w));

        set_create_pending(&mut w, now + Duration::seconds(10));
        assert!(create_incomplete(&w));

        set_create_failed(&mut w, now + Duration::seconds(11));
        assert!(!create_incomplete(&w));
    }

    #[test]
    fn test_selector_matches() {
        let selector = Selector {
            match_labels: BTreeMap::from([("team".to_string(), "orders".to_string())]),
            policy: None,
        };
        let labels = BTreeMap::from([
            ("team".to_string(), "orders".to_string()),
            ("env".to_string(), "prod".to_string()),
        ]);
        assert!(selector.matches(&labels));
        assert!(!selector.matches(&BTreeMap::new()));
    }

    #[test]
    fn test_defaults() {
        let w = widget("a");
        assert_eq!(w.deletion_policy(), DeletionPolicy::Delete);
        assert_eq!(w.provider_config_name(), "default");
        assert!(w.conditions().is_empty());
    }
}
