//! Generic managed-resource reconciler
//!
//! One [`Reconciler::reconcile`] call drives a single resource one step
//! closer to its desired state:
//!
//! ```text
//! Load ─┬─ deleting ──> Finalize ── observe ──> delete ──> remove finalizer
//!       └─ finalizer/external name ──> ResolveRefs ──> Connect ──> Observe
//!                                                                   ├─ pending     ──> status, requeue short
//!                                                                   ├─ absent      ──> Create, requeue short
//!                                                                   ├─ drifted     ──> Update, requeue short
//!                                                                   └─ up to date  ──> publish, status, poll
//! ```
//!
//! All service-specific behaviour lives behind [`ExternalClient`]. Spec and
//! metadata writes use optimistic concurrency with a bounded refetch-retry;
//! status writes go through the status subresource and are skipped when
//! nothing changed.

use crate::conditions::{set_condition, Condition};
use crate::error::{ErrorKind, ProviderError, Result, Stage, StageExt};
use crate::events::{reasons, EventRecorder, NoopEventRecorder};
use crate::external::{Connector, ExternalClient, ExternalObservation};
use crate::metrics::{ControllerMetrics, ReconcileResult};
use crate::publisher::{ConnectionDetails, ConnectionPublisher, SecretPublisher};
use crate::resolver::{resolve_references, FieldResolver};
use crate::resource::{
    add_finalizer, clear_operation_id, create_incomplete, external_name, has_finalizer,
    is_being_deleted, operation_id, remove_finalizer, set_create_failed, set_create_pending,
    set_create_succeeded, set_external_name, set_operation_id, DeletionPolicy, ManagedResource,
    FINALIZER_NAME,
};
use crate::retry::{retry_if, update_with_retry, RetryConfig};
use crate::store::{status_of, with_status_of, Store, StoreSet};
use chrono::Utc;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Timing and retry settings of the reconciler
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Requeue delay once a resource is in sync
    pub poll_interval: Duration,
    /// Requeue delay after a mutation, to observe its effect
    pub short_wait: Duration,
    /// Requeue delay after credentials were rejected
    pub auth_backoff: Duration,
    /// Upper bound for one reconcile invocation
    pub reconcile_timeout: Duration,
    /// Conflict retries for spec, metadata and status writes
    pub retry: RetryConfig,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            short_wait: Duration::from_secs(5),
            auth_backoff: Duration::from_secs(300),
            reconcile_timeout: Duration::from_secs(120),
            retry: RetryConfig::default(),
        }
    }
}

/// What the controller should do with the key next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Reset back-off and reconcile again after the delay
    RequeueAfter(Duration),
    /// Requeue with per-key exponential back-off
    RateLimited,
    /// Do not requeue; wait for the next change
    Forget,
}

type Step = (Outcome, ReconcileResult);

/// A resource being reconciled, with the status it was loaded with
struct Working<K> {
    obj: K,
    seen_status: serde_json::Value,
}

impl<K: ManagedResource> Working<K> {
    fn new(obj: K) -> Self {
        let seen_status = status_of(&obj).unwrap_or(serde_json::Value::Null);
        Self { obj, seen_status }
    }

    fn set(&mut self, condition: Condition) -> bool {
        set_condition(&mut self.obj.resource_status_mut().conditions, condition)
    }

    /// Adopt the metadata and spec of a freshly written object, keeping the
    /// local status
    fn adopt(&mut self, written: K) -> Result<()> {
        self.obj = with_status_of(&written, &self.obj)?;
        Ok(())
    }
}

/// Reconciles one managed-resource kind
pub struct Reconciler<K: ManagedResource> {
    store: Arc<dyn Store<K>>,
    stores: StoreSet,
    connector: Arc<dyn Connector<K>>,
    references: Vec<Box<dyn FieldResolver<K>>>,
    publisher: Arc<dyn ConnectionPublisher<K>>,
    recorder: Arc<dyn EventRecorder>,
    metrics: ControllerMetrics,
    config: ReconcilerConfig,
}

impl<K: ManagedResource> Reconciler<K> {
    /// Reconciler reading `K` from `stores` and publishing connection
    /// details to Secrets
    pub fn new(stores: StoreSet, connector: Arc<dyn Connector<K>>) -> Self {
        Self {
            store: stores.store::<K>(),
            publisher: Arc::new(SecretPublisher::new(stores.secrets())),
            stores,
            connector,
            references: Vec::new(),
            recorder: Arc::new(NoopEventRecorder),
            metrics: ControllerMetrics::new(K::kind(&()).to_string()),
            config: ReconcilerConfig::default(),
        }
    }

    pub fn with_references(mut self, references: Vec<Box<dyn FieldResolver<K>>>) -> Self {
        self.references = references;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn ConnectionPublisher<K>>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Reconcile the resource with the given name
    #[instrument(skip(self, name), fields(kind = %K::kind(&()), name = %name))]
    pub async fn reconcile(&self, name: &str) -> Outcome {
        let start = Instant::now();
        let (outcome, result) =
            match tokio::time::timeout(self.config.reconcile_timeout, self.run(name)).await {
                Ok(step) => step,
                Err(_) => {
                    warn!(
                        timeout_secs = self.config.reconcile_timeout.as_secs(),
                        "Reconcile timed out"
                    );
                    (Outcome::RateLimited, ReconcileResult::Error)
                }
            };
        self.metrics.reconciled(result, start.elapsed());
        debug!(?outcome, "Reconcile finished");
        outcome
    }

    async fn run(&self, name: &str) -> Step {
        let obj = match self.store.get(name).await {
            Ok(Some(obj)) => obj,
            Ok(None) => {
                debug!("Resource no longer exists");
                return (Outcome::Forget, ReconcileResult::Success);
            }
            Err(e) => {
                warn!(error = %e, "Failed to load resource");
                return (self.outcome_for(&e), ReconcileResult::Error);
            }
        };

        if is_being_deleted(&obj) {
            self.finalize(Working::new(obj)).await
        } else {
            self.sync(Working::new(obj)).await
        }
    }

    async fn sync(&self, mut w: Working<K>) -> Step {
        if let Err(e) = self.initialize(&mut w).await {
            return self.fail(w, e).await;
        }

        if !self.references.is_empty() {
            match self.resolve(&w.obj).await {
                Ok(None) => {}
                Ok(Some(written)) => {
                    info!("Resolved references");
                    if let Err(e) = w.adopt(written) {
                        return self.fail(w, e).await;
                    }
                    self.write_status(&mut w).await;
                    return self.requeue_short();
                }
                Err(e) => {
                    self.event(&w.obj, EventType::Warning, reasons::CANNOT_RESOLVE_REFERENCES, &e)
                        .await;
                    return self.fail(w, e).await;
                }
            }
        }

        if let Err(e) = self.connector.validate(&w.obj) {
            return self.fail(w, e).await;
        }
        let client = match self.connect(&w.obj).await {
            Ok(client) => client,
            Err(e) => return self.fail(w, e).await,
        };

        let observation = match self.observe(client.as_ref(), &mut w).await {
            Ok(observation) => observation,
            Err(e) => return self.fail(w, e).await,
        };

        if observation.pending {
            let ready = observation.ready.unwrap_or_else(Condition::creating);
            if w.set(ready) {
                self.record(&w.obj, EventType::Normal, reasons::ASYNC_OPERATION_PENDING, None)
                    .await;
            }
            w.set(Condition::reconcile_success());
            self.write_status(&mut w).await;
            return self.requeue_short();
        }

        if !observation.resource_exists {
            if !K::name_as_external_name() && create_incomplete(&w.obj) {
                let e = ProviderError::Validation(
                    "a previous create may have succeeded without recording its identifier; \
                     set the external name or remove the create-pending annotation to retry"
                        .to_string(),
                )
                .at(Stage::Create);
                return self.fail(w, e).await;
            }
            return self.create(client.as_ref(), w).await;
        }

        if !observation.resource_up_to_date {
            return self.update(client.as_ref(), w).await;
        }

        if let Err(e) = self.publish(&w.obj, &observation.connection_details).await {
            return self.fail(w, e).await;
        }
        w.set(observation.ready.unwrap_or_else(Condition::available));
        w.set(Condition::reconcile_success());
        self.write_status(&mut w).await;
        (
            Outcome::RequeueAfter(self.config.poll_interval),
            ReconcileResult::Success,
        )
    }

    /// Add the finalizer and default the external name in one write
    async fn initialize(&self, w: &mut Working<K>) -> Result<()> {
        let default_name = K::name_as_external_name().then(|| w.obj.name_any());
        let needs_name = default_name.is_some() && external_name(&w.obj).is_none();
        if has_finalizer(&w.obj, FINALIZER_NAME) && !needs_name {
            return Ok(());
        }
        let written = update_with_retry(self.store.as_ref(), &self.config.retry, &w.obj, |o| {
            let mut changed = add_finalizer(o, FINALIZER_NAME);
            if let Some(name) = &default_name {
                if external_name(o).is_none() {
                    set_external_name(o, name.clone());
                    changed = true;
                }
            }
            changed
        })
        .await
        .stage(Stage::AddFinalizer)?;
        w.adopt(written)
    }

    /// Resolve references; returns the written object if the spec changed
    async fn resolve(&self, obj: &K) -> Result<Option<K>> {
        let mut candidate = obj.clone();
        if !resolve_references(&mut candidate, &self.references, &self.stores).await? {
            return Ok(None);
        }

        let name = obj.name_any();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.store.update(&candidate).await {
                Ok(written) => return Ok(Some(written)),
                Err(e) if e.is_conflict() && attempt < self.config.retry.max_attempts => {
                    debug!(attempt, "Conflict persisting resolved references, refetching");
                    candidate = self
                        .store
                        .get(&name)
                        .await
                        .stage(Stage::KubeUpdate)?
                        .ok_or_else(|| ProviderError::NotFound(name.clone()))?;
                    if !resolve_references(&mut candidate, &self.references, &self.stores).await? {
                        return Ok(None);
                    }
                }
                Err(e) => return Err(e.at(Stage::KubeUpdate)),
            }
        }
    }

    async fn connect(&self, obj: &K) -> Result<Box<dyn ExternalClient<K>>> {
        match self.connector.connect(obj).await {
            Ok(client) => Ok(client),
            Err(e) => {
                let e = e.at(Stage::Connect);
                self.event(obj, EventType::Warning, reasons::CANNOT_CONNECT_TO_PROVIDER, &e)
                    .await;
                Err(e)
            }
        }
    }

    /// Observe and persist identifier or late-initialization changes
    async fn observe(
        &self,
        client: &dyn ExternalClient<K>,
        w: &mut Working<K>,
    ) -> Result<ExternalObservation> {
        let before_name = external_name(&w.obj).map(str::to_string);
        let before_op = operation_id(&w.obj).map(str::to_string);

        self.metrics.external_call("observe");
        let observation = match client.observe(&mut w.obj).await {
            Ok(observation) => observation,
            Err(e) => {
                let reason = if e.has_stage(Stage::GetOperation)
                    && e.kind() == ErrorKind::Unavailable
                {
                    reasons::ASYNC_OPERATION_FAILED
                } else {
                    reasons::CANNOT_OBSERVE_EXTERNAL_RESOURCE
                };
                self.event(&w.obj, EventType::Warning, reason, &e).await;
                return Err(e);
            }
        };

        let name = external_name(&w.obj).map(str::to_string);
        let op = operation_id(&w.obj).map(str::to_string);
        let identity_changed = name != before_name || op != before_op;

        if observation.resource_late_initialized {
            debug!("Persisting late-initialized fields");
            match self.store.update(&w.obj).await {
                Ok(written) => {
                    w.adopt(written)?;
                    return Ok(observation);
                }
                // Late-init repeats on the next observe; identifiers must not wait
                Err(e) if e.is_conflict() && identity_changed => {}
                Err(e) => return Err(e.at(Stage::LateInitialize)),
            }
        }
        if identity_changed {
            self.persist_identity(w, name, op).await?;
        }
        Ok(observation)
    }

    /// Critical write of the external name and operation id
    async fn persist_identity(
        &self,
        w: &mut Working<K>,
        name: Option<String>,
        op: Option<String>,
    ) -> Result<()> {
        let written = update_with_retry(self.store.as_ref(), &self.config.retry, &w.obj, |o| {
            let mut changed = false;
            if let Some(name) = &name {
                if external_name(o) != Some(name.as_str()) {
                    set_external_name(o, name.clone());
                    changed = true;
                }
            }
            match &op {
                Some(op) if operation_id(o) != Some(op.as_str()) => {
                    set_operation_id(o, op.clone());
                    changed = true;
                }
                None if operation_id(o).is_some() => {
                    clear_operation_id(o);
                    changed = true;
                }
                _ => {}
            }
            changed
        })
        .await
        .stage(Stage::KubeUpdate)?;
        w.adopt(written)
    }

    async fn create(&self, client: &dyn ExternalClient<K>, mut w: Working<K>) -> Step {
        let started = Utc::now();
        match update_with_retry(self.store.as_ref(), &self.config.retry, &w.obj, |o| {
            set_create_pending(o, started);
            true
        })
        .await
        {
            Ok(written) => {
                if let Err(e) = w.adopt(written) {
                    return self.fail(w, e).await;
                }
            }
            Err(e) => return self.fail(w, e.at(Stage::KubeUpdate)).await,
        }

        self.record(&w.obj, EventType::Normal, reasons::CREATING_EXTERNAL_RESOURCE, None)
            .await;
        self.metrics.external_call("create");
        let creation = match client.create(&mut w.obj).await {
            Ok(creation) => creation,
            Err(e) => {
                let failed = Utc::now();
                match update_with_retry(self.store.as_ref(), &self.config.retry, &w.obj, |o| {
                    set_create_failed(o, failed);
                    true
                })
                .await
                {
                    Ok(written) => {
                        if let Err(e) = w.adopt(written) {
                            warn!(error = %e, "Failed to adopt written object");
                        }
                    }
                    Err(write_err) => {
                        warn!(error = %write_err, "Failed to record create failure");
                    }
                }
                self.event(&w.obj, EventType::Warning, reasons::CANNOT_CREATE_EXTERNAL_RESOURCE, &e)
                    .await;
                return self.fail(w, e).await;
            }
        };

        let name = creation
            .external_name
            .clone()
            .or_else(|| external_name(&w.obj).map(str::to_string));
        let op = creation
            .operation_id
            .clone()
            .or_else(|| operation_id(&w.obj).map(str::to_string));
        let succeeded = Utc::now();
        let written = update_with_retry(self.store.as_ref(), &self.config.retry, &w.obj, |o| {
            if let Some(name) = &name {
                set_external_name(o, name.clone());
            }
            if let Some(op) = &op {
                set_operation_id(o, op.clone());
            }
            set_create_succeeded(o, succeeded);
            true
        })
        .await;
        match written {
            Ok(written) => {
                if let Err(e) = w.adopt(written) {
                    return self.fail(w, e).await;
                }
            }
            Err(e) => {
                error!(
                    external_name = name.as_deref().unwrap_or_default(),
                    error = %e,
                    "External resource created but its identifier could not be recorded"
                );
                return self.fail(w, e.at(Stage::KubeUpdate)).await;
            }
        }
        info!(
            external_name = name.as_deref().unwrap_or_default(),
            operation_id = op.as_deref().unwrap_or_default(),
            "Created external resource"
        );

        if let Err(e) = self.publish(&w.obj, &creation.connection_details).await {
            return self.fail(w, e).await;
        }
        self.record(&w.obj, EventType::Normal, reasons::CREATED_EXTERNAL_RESOURCE, None)
            .await;
        w.set(Condition::creating());
        w.set(Condition::reconcile_success());
        self.write_status(&mut w).await;
        self.requeue_short()
    }

    async fn update(&self, client: &dyn ExternalClient<K>, mut w: Working<K>) -> Step {
        self.metrics.external_call("update");
        let update = match client.update(&mut w.obj).await {
            Ok(update) => update,
            Err(e) => {
                self.event(&w.obj, EventType::Warning, reasons::CANNOT_UPDATE_EXTERNAL_RESOURCE, &e)
                    .await;
                return self.fail(w, e).await;
            }
        };

        if update.external_name.is_some() || update.operation_id.is_some() {
            let name = update
                .external_name
                .clone()
                .or_else(|| external_name(&w.obj).map(str::to_string));
            let op = update
                .operation_id
                .clone()
                .or_else(|| operation_id(&w.obj).map(str::to_string));
            if let Err(e) = self.persist_identity(&mut w, name, op).await {
                return self.fail(w, e).await;
            }
        }
        if let Err(e) = self.publish(&w.obj, &update.connection_details).await {
            return self.fail(w, e).await;
        }

        info!(remaining = update.remaining, "Updated external resource");
        self.record(&w.obj, EventType::Normal, reasons::UPDATED_EXTERNAL_RESOURCE, None)
            .await;
        w.set(Condition::reconcile_success());
        self.write_status(&mut w).await;
        self.requeue_short()
    }

    async fn finalize(&self, mut w: Working<K>) -> Step {
        if !has_finalizer(&w.obj, FINALIZER_NAME) {
            return (Outcome::Forget, ReconcileResult::Success);
        }

        let never_created = external_name(&w.obj).is_none() && operation_id(&w.obj).is_none();
        if w.obj.deletion_policy() == DeletionPolicy::Orphan || never_created {
            debug!(
                orphan = w.obj.deletion_policy() == DeletionPolicy::Orphan,
                "Releasing resource without deleting the external object"
            );
            return self.release(w).await;
        }

        let client = match self.connect(&w.obj).await {
            Ok(client) => client,
            Err(e) => return self.fail(w, e).await,
        };

        self.metrics.external_call("observe");
        let observation = match client.observe(&mut w.obj).await {
            Ok(observation) => observation,
            Err(e) => {
                self.event(&w.obj, EventType::Warning, reasons::CANNOT_OBSERVE_EXTERNAL_RESOURCE, &e)
                    .await;
                return self.fail(w, e).await;
            }
        };
        if observation.pending {
            w.set(Condition::deleting());
            self.write_status(&mut w).await;
            return self.requeue_short();
        }
        if !observation.resource_exists {
            return self.release(w).await;
        }

        if w.set(Condition::deleting()) {
            self.record(&w.obj, EventType::Normal, reasons::DELETING_EXTERNAL_RESOURCE, None)
                .await;
        }
        self.metrics.external_call("delete");
        match client.delete(&mut w.obj).await {
            Ok(deletion) if deletion.completed => self.release(w).await,
            Ok(deletion) => {
                if let Some(op) = deletion.operation_id {
                    let name = external_name(&w.obj).map(str::to_string);
                    if let Err(e) = self.persist_identity(&mut w, name, Some(op)).await {
                        return self.fail(w, e).await;
                    }
                }
                w.set(Condition::reconcile_success());
                self.write_status(&mut w).await;
                self.requeue_short()
            }
            Err(e) if e.is_not_found() => self.release(w).await,
            Err(e) => {
                self.event(&w.obj, EventType::Warning, reasons::CANNOT_DELETE_EXTERNAL_RESOURCE, &e)
                    .await;
                self.fail(w, e).await
            }
        }
    }

    /// Remove connection details and the finalizer
    async fn release(&self, w: Working<K>) -> Step {
        if let Err(e) = self.publisher.unpublish(&w.obj).await {
            return self.fail(w, e).await;
        }
        if let Err(e) = update_with_retry(self.store.as_ref(), &self.config.retry, &w.obj, |o| {
            remove_finalizer(o, FINALIZER_NAME)
        })
        .await
        {
            if e.is_not_found() {
                return (Outcome::Forget, ReconcileResult::Success);
            }
            return self.fail(w, e.at(Stage::RemoveFinalizer)).await;
        }
        info!("Removed finalizer");
        self.record(&w.obj, EventType::Normal, reasons::DELETED_EXTERNAL_RESOURCE, None)
            .await;
        (Outcome::Forget, ReconcileResult::Success)
    }

    async fn publish(&self, obj: &K, details: &ConnectionDetails) -> Result<()> {
        match self.publisher.publish(obj, details).await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.event(obj, EventType::Warning, reasons::CANNOT_PUBLISH_CONNECTION_DETAILS, &e)
                    .await;
                Err(e)
            }
        }
    }

    /// Record the failure in the conditions and pick the requeue strategy
    async fn fail(&self, mut w: Working<K>, err: ProviderError) -> Step {
        let message = err.to_string();
        warn!(error = %message, error_kind = err.kind().as_str(), "Reconcile failed");

        match err.kind() {
            ErrorKind::ReferenceNotReady | ErrorKind::ReferenceNotFound => {
                w.set(Condition::reference_not_ready(message));
            }
            ErrorKind::Unavailable => {
                w.set(Condition::unavailable(message.clone()));
                w.set(Condition::reconcile_error(message));
            }
            _ => {
                w.set(Condition::reconcile_error(message));
            }
        }
        self.write_status(&mut w).await;
        (self.outcome_for(&err), ReconcileResult::Error)
    }

    fn outcome_for(&self, err: &ProviderError) -> Outcome {
        if let Some(delay) = err.requeue_delay() {
            return Outcome::RequeueAfter(delay);
        }
        match err.kind() {
            ErrorKind::Validation | ErrorKind::Internal => Outcome::Forget,
            ErrorKind::Auth => Outcome::RequeueAfter(self.config.auth_backoff),
            _ => Outcome::RateLimited,
        }
    }

    fn requeue_short(&self) -> Step {
        (
            Outcome::RequeueAfter(self.config.short_wait),
            ReconcileResult::Requeue,
        )
    }

    /// Write the status if it differs from what was loaded; failures are logged
    async fn write_status(&self, w: &mut Working<K>) {
        let op = operation_id(&w.obj).map(str::to_string);
        w.obj.set_observed_operation_id(op);
        let current = match status_of(&w.obj) {
            Ok(current) => current,
            Err(e) => {
                warn!(error = %e, "Failed to serialize status");
                return;
            }
        };
        if current == w.seen_status {
            return;
        }
        let result = retry_if(
            &self.config.retry,
            "patch_status",
            |e| e.kind() == ErrorKind::Transient || e.is_conflict(),
            || self.store.patch_status(&w.obj),
        )
        .await;
        match result {
            Ok(_) => w.seen_status = current,
            Err(e) => {
                let e = e.at(Stage::KubeStatusUpdate);
                warn!(error = %e, "Failed to write status");
            }
        }
    }

    async fn event(&self, obj: &K, type_: EventType, reason: &str, err: &ProviderError) {
        self.record(obj, type_, reason, Some(err.to_string())).await;
    }

    async fn record(&self, obj: &K, type_: EventType, reason: &str, note: Option<String>) {
        self.recorder
            .record(&obj.object_ref(&()), type_, reason, note)
            .await;
    }
}
