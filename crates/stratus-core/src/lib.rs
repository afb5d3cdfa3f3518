//! # Stratus Core
//!
//! Generic reconciliation engine for managed resources: Kubernetes custom
//! resources that each stand for one object in an external cloud provider.
//!
//! The crate holds everything that is not specific to a cloud service. The
//! AWS adapters in `stratus-aws` plug into it through the [`external`] traits.
//!
//! ## Features
//!
//! - **Managed resource model**: common spec/status blocks, the external-name
//!   annotation, finalizers and creation bookkeeping
//! - **Reconciler**: observe, create, update and delete with late-initialization,
//!   drift detection, async operation tracking and connection publishing
//! - **Reference resolution**: fill identifier fields from other resources by
//!   name or label selector
//! - **Controller runtime**: watch, deduplicating rate-limited work queue and a
//!   worker pool with graceful shutdown
//! - **Stores**: Kubernetes-backed and in-memory implementations behind one trait
//! - **Observability**: structured logging, Kubernetes Events and Prometheus
//!   compatible metrics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stratus_core::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! let stores = StoreSet::Kube(client);
//! let reconciler = Reconciler::<Queue>::new(stores.clone(), connector)
//!     .with_references(queue_references());
//! let controller = Controller::new(reconciler, stores.store::<Queue>()).with_workers(5);
//!
//! let shutdown = CancellationToken::new();
//! controller.run(shutdown).await;
//! ```
//!
//! ## Lifecycle
//!
//! 1. **Load**: read the resource; if it is being deleted, finalize it
//! 2. **Resolve**: fill reference fields and persist them
//! 3. **Observe**: describe the external object, late-initialize the spec
//! 4. **Act**: create, update or do nothing
//! 5. **Status**: set `Ready`/`Synced` conditions and publish connection details
//!
//! ## Modules
//!
//! - [`resource`] - managed resource trait, annotations and finalizers
//! - [`conditions`] - `Ready` and `Synced` conditions
//! - [`error`] - error taxonomy and stage prefixes
//! - [`store`], [`memory`] - store abstraction and in-memory implementation
//! - [`resolver`] - reference resolution
//! - [`drift`] - late-init, tag diff, policy comparison, patch groups
//! - [`operation`] - asynchronous operation tracking
//! - [`external`] - adapter contract and hook sequencing
//! - [`publisher`] - connection details
//! - [`reconciler`], [`controller`], [`workqueue`] - the runtime

pub mod conditions;
pub mod controller;
pub mod drift;
pub mod error;
pub mod events;
pub mod external;
pub mod memory;
pub mod metrics;
pub mod operation;
pub mod publisher;
pub mod reconciler;
pub mod resolver;
pub mod resource;
pub mod retry;
pub mod store;
pub mod workqueue;

pub mod prelude {
    //! Re-exports for convenient usage
    pub use crate::conditions::{
        get_condition, is_condition_true, set_condition, Condition, TYPE_READY, TYPE_SYNCED,
    };
    pub use crate::controller::{Controller, Manager};
    pub use crate::error::{ErrorKind, ProviderError, Result, Stage, StageExt};
    pub use crate::events::{
        reasons, EventRecorder, KubeEventRecorder, NoopEventRecorder, RecordingEventRecorder,
    };
    pub use crate::external::{
        Connector, ExternalClient, ExternalCreation, ExternalDeletion, ExternalObservation,
        ExternalUpdate, HookedClient, Hooks,
    };
    pub use crate::memory::{MemoryRegistry, MemorySecretStore, MemoryStore};
    pub use crate::operation::{observe_operation, Operation, OperationPoller, OperationStatus};
    pub use crate::publisher::{
        generate_password, insert_detail, keys, ConnectionDetails, ConnectionPublisher,
        PublisherChain, SecretPublisher,
    };
    pub use crate::reconciler::{Outcome, Reconciler, ReconcilerConfig};
    pub use crate::resolver::{FieldResolver, MultiReference, SingleReference};
    pub use crate::resource::{
        external_name, operation_id, set_external_name, DeletionPolicy, ManagedResource,
        Reference, ResourceSpec, ResourceStatus, SecretKeySelector, SecretReference, Selector,
    };
    pub use crate::retry::RetryConfig;
    pub use crate::store::{SecretStore, Store, StoreSet};
    pub use crate::workqueue::{WorkQueue, WorkQueueConfig};
}
