//! Kubernetes Event recording for managed-resource controllers
//!
//! Events are fire-and-forget: a failed publish is logged and never fails
//! the reconciliation that emitted it.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

/// Publishes Kubernetes Events about managed resources
#[async_trait]
pub trait EventRecorder: Send + Sync {
    /// * `resource_ref` - the managed resource the event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - one of [`reasons`]
    /// * `note` - optional human-readable message
    async fn record(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: Option<String>,
    );
}

/// Recorder backed by `kube::runtime::events::Recorder`
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    /// `controller_name` shows up as the reporting component
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: actions::RECONCILE.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Discards all events
pub struct NoopEventRecorder;

#[async_trait]
impl EventRecorder for NoopEventRecorder {
    async fn record(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _note: Option<String>,
    ) {
    }
}

/// An event captured by [`RecordingEventRecorder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub name: String,
    pub warning: bool,
    pub reason: String,
    pub note: Option<String>,
}

/// Keeps events in memory so tests can assert on them
#[derive(Clone, Default)]
pub struct RecordingEventRecorder {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl RecordingEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Reasons in the order they were recorded
    pub fn reasons(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.reason.clone()).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl EventRecorder for RecordingEventRecorder {
    async fn record(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        note: Option<String>,
    ) {
        self.events.lock().push(RecordedEvent {
            name: resource_ref.name.clone().unwrap_or_default(),
            warning: type_ == EventType::Warning,
            reason: reason.to_string(),
            note,
        });
    }
}

/// Well-known event reasons
pub mod reasons {
    pub const CREATING_EXTERNAL_RESOURCE: &str = "CreatingExternalResource";
    pub const CREATED_EXTERNAL_RESOURCE: &str = "CreatedExternalResource";
    pub const CANNOT_CREATE_EXTERNAL_RESOURCE: &str = "CannotCreateExternalResource";
    pub const UPDATED_EXTERNAL_RESOURCE: &str = "UpdatedExternalResource";
    pub const CANNOT_UPDATE_EXTERNAL_RESOURCE: &str = "CannotUpdateExternalResource";
    pub const DELETING_EXTERNAL_RESOURCE: &str = "DeletingExternalResource";
    pub const DELETED_EXTERNAL_RESOURCE: &str = "DeletedExternalResource";
    pub const CANNOT_DELETE_EXTERNAL_RESOURCE: &str = "CannotDeleteExternalResource";
    pub const CANNOT_RESOLVE_REFERENCES: &str = "CannotResolveResourceReferences";
    pub const ASYNC_OPERATION_PENDING: &str = "AsyncOperationPending";
    pub const ASYNC_OPERATION_FAILED: &str = "AsyncOperationFailed";
    pub const CANNOT_OBSERVE_EXTERNAL_RESOURCE: &str = "CannotObserveExternalResource";
    pub const CANNOT_CONNECT_TO_PROVIDER: &str = "CannotConnectToProvider";
    pub const CANNOT_PUBLISH_CONNECTION_DETAILS: &str = "CannotPublishConnectionDetails";
}

/// Event actions
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
}
