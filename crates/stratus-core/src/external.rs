//! The contract between the generic reconciler and a per-kind adapter
//!
//! The reconciler only sees [`ExternalClient`]. Adapters normally implement
//! the finer-grained [`Hooks`] and wrap them in [`HookedClient`], which
//! provides the generic observe/create/update/delete sequencing:
//!
//! ```text
//! observe: pre_observe -> describe -> late_initialize -> is_up_to_date -> post_observe
//! create:  pre_create  -> create   -> post_create
//! update:  pre_update  -> update   -> post_update
//! delete:  pre_delete  -> delete   -> post_delete
//! ```
//!
//! A client lives for one reconcile. The object described by the last
//! observe is handed to `update` and `delete`, so adapters do not describe
//! it a second time.

use crate::conditions::Condition;
use crate::error::{Result, Stage, StageExt};
use crate::publisher::ConnectionDetails;
use crate::resource::ManagedResource;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::marker::PhantomData;

/// Result of observing the external object
#[derive(Debug, Clone, Default)]
pub struct ExternalObservation {
    /// The external object exists
    pub resource_exists: bool,

    /// The external object matches the desired state
    pub resource_up_to_date: bool,

    /// Unset spec fields were filled from the observed object
    pub resource_late_initialized: bool,

    /// An asynchronous operation is still running; check back soon
    pub pending: bool,

    /// Ready condition to report instead of the default for this outcome
    pub ready: Option<Condition>,

    /// Connection details derivable from the observed object
    pub connection_details: ConnectionDetails,
}

impl ExternalObservation {
    /// The external object does not exist
    pub fn absent() -> Self {
        Self::default()
    }

    /// The external object exists; `up_to_date` says whether it has drifted
    pub fn exists(up_to_date: bool) -> Self {
        Self {
            resource_exists: true,
            resource_up_to_date: up_to_date,
            ..Default::default()
        }
    }

    /// An operation on the external object is in flight
    pub fn in_progress(exists: bool, ready: Condition) -> Self {
        Self {
            resource_exists: exists,
            resource_up_to_date: exists,
            pending: true,
            ready: Some(ready),
            ..Default::default()
        }
    }

    pub fn with_connection_details(mut self, details: ConnectionDetails) -> Self {
        self.connection_details = details;
        self
    }
}

/// Result of creating the external object
#[derive(Debug, Clone, Default)]
pub struct ExternalCreation {
    /// Identifier assigned by the provider, persisted as the external name
    pub external_name: Option<String>,

    /// Handle of the asynchronous create operation
    pub operation_id: Option<String>,

    /// Details only known at creation time, such as a generated password
    pub connection_details: ConnectionDetails,
}

/// Result of updating the external object
#[derive(Debug, Clone, Default)]
pub struct ExternalUpdate {
    /// New identifier after a rename
    pub external_name: Option<String>,

    /// Handle of the asynchronous update operation
    pub operation_id: Option<String>,

    /// More modification groups are pending; requeue soon
    pub remaining: bool,

    pub connection_details: ConnectionDetails,
}

/// Result of deleting the external object
#[derive(Debug, Clone, Default)]
pub struct ExternalDeletion {
    /// Deletion is confirmed; the finalizer may be removed
    pub completed: bool,

    /// Handle of the asynchronous delete operation
    pub operation_id: Option<String>,
}

/// Operations on the external object behind one managed resource.
///
/// All methods take the resource mutably: observe late-initializes the spec
/// and fills `status.atProvider`, create may record identifiers.
#[async_trait]
pub trait ExternalClient<K>: Send + Sync {
    async fn observe(&self, obj: &mut K) -> Result<ExternalObservation>;
    async fn create(&self, obj: &mut K) -> Result<ExternalCreation>;
    async fn update(&self, obj: &mut K) -> Result<ExternalUpdate>;
    async fn delete(&self, obj: &mut K) -> Result<ExternalDeletion>;
}

/// Builds an [`ExternalClient`] scoped to a resource's credentials and region
#[async_trait]
pub trait Connector<K>: Send + Sync {
    /// Check the desired state before it is sent anywhere. Not called while
    /// deleting, so an invalid spec never blocks finalization.
    fn validate(&self, _obj: &K) -> Result<()> {
        Ok(())
    }

    async fn connect(&self, obj: &K) -> Result<Box<dyn ExternalClient<K>>>;
}

/// Per-kind hook set specializing the generic client
#[async_trait]
pub trait Hooks<K: ManagedResource>: Send + Sync {
    /// Raw observation of the external object
    type Observed: Send + Sync;

    /// Runs before describe. Returning an observation ends the observe early,
    /// e.g. while an asynchronous create is still in flight.
    async fn pre_observe(&self, _obj: &mut K) -> Result<Option<ExternalObservation>> {
        Ok(None)
    }

    /// Read the external object; `None` if it does not exist
    async fn describe(&self, obj: &K) -> Result<Option<Self::Observed>>;

    /// Copy observed values into unset spec fields. Returns true if anything changed.
    fn late_initialize(&self, _obj: &mut K, _observed: &Self::Observed) -> bool {
        false
    }

    /// Whether the spec matches the observed object
    async fn is_up_to_date(&self, obj: &K, observed: &Self::Observed) -> Result<bool>;

    /// Fill status and connection details from the observation
    async fn post_observe(
        &self,
        _obj: &mut K,
        _observed: &Self::Observed,
        observation: ExternalObservation,
    ) -> Result<ExternalObservation> {
        Ok(observation)
    }

    async fn pre_create(&self, _obj: &mut K) -> Result<()> {
        Ok(())
    }

    async fn create(&self, obj: &mut K) -> Result<ExternalCreation>;

    async fn post_create(
        &self,
        _obj: &mut K,
        creation: ExternalCreation,
    ) -> Result<ExternalCreation> {
        Ok(creation)
    }

    async fn pre_update(&self, _obj: &mut K) -> Result<()> {
        Ok(())
    }

    /// `observed` is what the preceding observe described, if anything
    async fn update(
        &self,
        obj: &mut K,
        observed: Option<&Self::Observed>,
    ) -> Result<ExternalUpdate>;

    async fn post_update(&self, _obj: &mut K, update: ExternalUpdate) -> Result<ExternalUpdate> {
        Ok(update)
    }

    async fn pre_delete(&self, _obj: &mut K) -> Result<()> {
        Ok(())
    }

    async fn delete(
        &self,
        obj: &mut K,
        observed: Option<&Self::Observed>,
    ) -> Result<ExternalDeletion>;

    async fn post_delete(
        &self,
        _obj: &mut K,
        deletion: ExternalDeletion,
    ) -> Result<ExternalDeletion> {
        Ok(deletion)
    }
}

/// [`ExternalClient`] driven by a [`Hooks`] implementation
pub struct HookedClient<K: ManagedResource, H: Hooks<K>> {
    hooks: H,
    observed: Mutex<Option<H::Observed>>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ManagedResource, H: Hooks<K>> HookedClient<K, H> {
    pub fn new(hooks: H) -> Self {
        Self {
            hooks,
            observed: Mutex::new(None),
            _kind: PhantomData,
        }
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }
}

#[async_trait]
impl<K, H> ExternalClient<K> for HookedClient<K, H>
where
    K: ManagedResource,
    H: Hooks<K>,
{
    async fn observe(&self, obj: &mut K) -> Result<ExternalObservation> {
        self.observed.lock().take();
        if let Some(early) = self.hooks.pre_observe(obj).await.stage(Stage::Describe)? {
            return Ok(early);
        }
        let Some(observed) = self.hooks.describe(obj).await.stage(Stage::Describe)? else {
            return Ok(ExternalObservation::absent());
        };
        let late_initialized = self.hooks.late_initialize(obj, &observed);
        let up_to_date = self
            .hooks
            .is_up_to_date(obj, &observed)
            .await
            .stage(Stage::IsUpToDate)?;
        let observation = ExternalObservation {
            resource_late_initialized: late_initialized,
            ..ExternalObservation::exists(up_to_date)
        };
        let observation = self
            .hooks
            .post_observe(obj, &observed, observation)
            .await
            .stage(Stage::Describe)?;
        *self.observed.lock() = Some(observed);
        Ok(observation)
    }

    async fn create(&self, obj: &mut K) -> Result<ExternalCreation> {
        self.hooks.pre_create(obj).await.stage(Stage::Create)?;
        let creation = self.hooks.create(obj).await.stage(Stage::Create)?;
        self.hooks
            .post_create(obj, creation)
            .await
            .stage(Stage::Create)
    }

    async fn update(&self, obj: &mut K) -> Result<ExternalUpdate> {
        let observed = self.observed.lock().take();
        self.hooks.pre_update(obj).await.stage(Stage::Update)?;
        let update = self
            .hooks
            .update(obj, observed.as_ref())
            .await
            .stage(Stage::Update)?;
        self.hooks
            .post_update(obj, update)
            .await
            .stage(Stage::Update)
    }

    async fn delete(&self, obj: &mut K) -> Result<ExternalDeletion> {
        let observed = self.observed.lock().take();
        self.hooks.pre_delete(obj).await.stage(Stage::Delete)?;
        let deletion = self
            .hooks
            .delete(obj, observed.as_ref())
            .await
            .stage(Stage::Delete)?;
        self.hooks
            .post_delete(obj, deletion)
            .await
            .stage(Stage::Delete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ProviderError};
    use crate::resource::testing::{widget, Widget};
    use parking_lot::Mutex;

    /// Hooks recording the order in which they are called
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<&'static str>>,
        seen: Mutex<Option<i32>>,
        exists: bool,
        fail_update: bool,
    }

    impl Recorder {
        fn push(&self, call: &'static str) {
            self.calls.lock().push(call);
        }
    }

    #[async_trait]
    impl Hooks<Widget> for Recorder {
        type Observed = i32;

        async fn pre_observe(&self, _obj: &mut Widget) -> Result<Option<ExternalObservation>> {
            self.push("pre_observe");
            Ok(None)
        }

        async fn describe(&self, _obj: &Widget) -> Result<Option<i32>> {
            self.push("describe");
            Ok(self.exists.then_some(7))
        }

        fn late_initialize(&self, obj: &mut Widget, observed: &i32) -> bool {
            self.push("late_initialize");
            crate::drift::late_init(&mut obj.spec.for_provider.size, Some(*observed))
        }

        async fn is_up_to_date(&self, obj: &Widget, observed: &i32) -> Result<bool> {
            self.push("is_up_to_date");
            Ok(obj.spec.for_provider.size == Some(*observed))
        }

        async fn post_observe(
            &self,
            _obj: &mut Widget,
            _observed: &i32,
            observation: ExternalObservation,
        ) -> Result<ExternalObservation> {
            self.push("post_observe");
            Ok(observation)
        }

        async fn create(&self, _obj: &mut Widget) -> Result<ExternalCreation> {
            self.push("create");
            Ok(ExternalCreation::default())
        }

        async fn update(
            &self,
            _obj: &mut Widget,
            observed: Option<&i32>,
        ) -> Result<ExternalUpdate> {
            self.push("update");
            *self.seen.lock() = observed.copied();
            if self.fail_update {
                return Err(ProviderError::Unavailable("resize in progress".into()));
            }
            Ok(ExternalUpdate::default())
        }

        async fn delete(
            &self,
            _obj: &mut Widget,
            _observed: Option<&i32>,
        ) -> Result<ExternalDeletion> {
            self.push("delete");
            Ok(ExternalDeletion {
                completed: true,
                operation_id: None,
            })
        }
    }

    fn hooked(recorder: Recorder) -> HookedClient<Widget, Recorder> {
        HookedClient::new(recorder)
    }

    #[tokio::test]
    async fn test_observe_absent_skips_drift_hooks() {
        let client = hooked(Recorder::default());
        let mut w = widget("a");
        let obs = client.observe(&mut w).await.unwrap();
        assert!(!obs.resource_exists);
        assert_eq!(*client.hooks().calls.lock(), vec!["pre_observe", "describe"]);
    }

    #[tokio::test]
    async fn test_observe_order_and_late_init() {
        let client = hooked(Recorder {
            exists: true,
            ..Default::default()
        });
        let mut w = widget("a");
        let obs = client.observe(&mut w).await.unwrap();

        assert!(obs.resource_exists);
        assert!(obs.resource_late_initialized);
        assert!(obs.resource_up_to_date);
        assert_eq!(w.spec.for_provider.size, Some(7));
        assert_eq!(
            *client.hooks().calls.lock(),
            vec![
                "pre_observe",
                "describe",
                "late_initialize",
                "is_up_to_date",
                "post_observe"
            ]
        );

        // Fixed point
        let obs = client.observe(&mut w).await.unwrap();
        assert!(!obs.resource_late_initialized);
    }

    #[tokio::test]
    async fn test_update_receives_last_observation() {
        let client = hooked(Recorder {
            exists: true,
            ..Default::default()
        });
        let mut w = widget("a");
        client.observe(&mut w).await.unwrap();
        client.update(&mut w).await.unwrap();
        assert_eq!(*client.hooks().seen.lock(), Some(7));

        // Consumed by the update
        client.update(&mut w).await.unwrap();
        assert_eq!(*client.hooks().seen.lock(), None);
    }

    #[tokio::test]
    async fn test_update_error_carries_stage() {
        let client = hooked(Recorder {
            fail_update: true,
            ..Default::default()
        });
        let err = client.update(&mut widget("a")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert_eq!(err.stage(), Some(Stage::Update));
    }

    #[test]
    fn test_in_progress_observation() {
        let obs = ExternalObservation::in_progress(false, Condition::creating());
        assert!(obs.pending);
        assert!(!obs.resource_exists);
        assert_eq!(obs.ready.unwrap().reason, "Creating");
    }
}
