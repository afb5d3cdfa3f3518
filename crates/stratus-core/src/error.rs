//! Error types for managed-resource reconciliation
//!
//! Every failure inside a reconciliation is a [`ProviderError`]. Errors raised
//! by a particular stage of the loop are wrapped with [`ProviderError::at`] so
//! the message carries a stable prefix (`cannot describe external resource: ...`)
//! while [`ProviderError::kind`] still reports the underlying classification.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classification that drives requeue behaviour and conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Network, throttling, 5xx or an in-flight duplicate request
    Transient,
    /// The addressed object does not exist
    NotFound,
    /// Optimistic-concurrency violation on the store
    Conflict,
    /// The desired state is impossible; wait for a spec change
    Validation,
    /// Credentials were rejected or are missing
    Auth,
    /// The provider reports the object is busy (e.g. resize in progress)
    Unavailable,
    /// A referenced resource exists but has not produced its value yet
    ReferenceNotReady,
    /// A referenced resource does not exist
    ReferenceNotFound,
    /// Programmer or wiring error
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Validation => "validation",
            ErrorKind::Auth => "auth",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::ReferenceNotReady => "reference_not_ready",
            ErrorKind::ReferenceNotFound => "reference_not_found",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Stage of the reconciliation that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Describe,
    Create,
    Update,
    Delete,
    ListTags,
    GetQueueUrl,
    GetQueueAttributes,
    GetOperation,
    GetNamespace,
    KubeUpdate,
    KubeStatusUpdate,
    ReferenceResolution,
    Connect,
    PublishConnection,
    UnpublishConnection,
    AddFinalizer,
    RemoveFinalizer,
    LateInitialize,
    IsUpToDate,
}

impl Stage {
    /// Stable message prefix for the stage
    pub fn prefix(&self) -> &'static str {
        match self {
            Stage::Describe => "cannot describe external resource",
            Stage::Create => "cannot create external resource",
            Stage::Update => "cannot update external resource",
            Stage::Delete => "cannot delete external resource",
            Stage::ListTags => "cannot list tags",
            Stage::GetQueueUrl => "cannot get queue url",
            Stage::GetQueueAttributes => "cannot get queue attributes",
            Stage::GetOperation => "cannot get operation",
            Stage::GetNamespace => "cannot get namespace",
            Stage::KubeUpdate => "cannot update managed resource",
            Stage::KubeStatusUpdate => "cannot update managed resource status",
            Stage::ReferenceResolution => "cannot resolve references",
            Stage::Connect => "cannot connect to provider",
            Stage::PublishConnection => "cannot publish connection details",
            Stage::UnpublishConnection => "cannot unpublish connection details",
            Stage::AddFinalizer => "cannot add finalizer",
            Stage::RemoveFinalizer => "cannot remove finalizer",
            Stage::LateInitialize => "cannot late-initialize managed resource",
            Stage::IsUpToDate => "cannot determine if external resource is up to date",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Errors that can occur while reconciling a managed resource
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Retryable provider or network failure
    #[error("{0}")]
    Transient(String),

    /// Object not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Store optimistic-concurrency conflict
    #[error("conflict: {0}")]
    Conflict(String),

    /// Invalid desired state
    #[error("validation failed: {0}")]
    Validation(String),

    /// Authentication or authorization failure
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Provider reports the object cannot be modified right now
    #[error("{0}")]
    Unavailable(String),

    /// Referenced resource is not ready
    #[error("referenced resource is not ready: {0}")]
    ReferenceNotReady(String),

    /// Referenced resource does not exist
    #[error("referenced resource not found: {0}")]
    ReferenceNotFound(String),

    /// Operation timed out
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Kubernetes API error
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),

    /// Error annotated with the reconciliation stage that produced it
    #[error("{stage}: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<ProviderError>,
    },
}

/// Result type for reconciliation operations
pub type Result<T> = std::result::Result<T, ProviderError>;

impl ProviderError {
    /// Wrap this error with a stage prefix
    pub fn at(self, stage: Stage) -> Self {
        ProviderError::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping stage wrappers
    pub fn root(&self) -> &ProviderError {
        match self {
            ProviderError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Outermost stage, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ProviderError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether `stage` appears anywhere in the wrapper chain
    pub fn has_stage(&self, stage: Stage) -> bool {
        match self {
            ProviderError::Stage { stage: s, source } => *s == stage || source.has_stage(stage),
            _ => false,
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            ProviderError::Transient(_) | ProviderError::Timeout(_) => ErrorKind::Transient,
            ProviderError::NotFound(_) => ErrorKind::NotFound,
            ProviderError::Conflict(_) => ErrorKind::Conflict,
            ProviderError::Validation(_) => ErrorKind::Validation,
            ProviderError::Auth(_) => ErrorKind::Auth,
            ProviderError::Unavailable(_) => ErrorKind::Unavailable,
            ProviderError::ReferenceNotReady(_) => ErrorKind::ReferenceNotReady,
            ProviderError::ReferenceNotFound(_) => ErrorKind::ReferenceNotFound,
            ProviderError::Kube(e) => classify_kube_error(e),
            ProviderError::Serialization(_) | ProviderError::Internal(_) => ErrorKind::Internal,
            ProviderError::Stage { .. } => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Check if this error is retryable without a spec change
    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Validation | ErrorKind::Internal)
    }

    /// Get a suggested requeue delay that overrides per-key back-off
    pub fn requeue_delay(&self) -> Option<Duration> {
        match self.kind() {
            ErrorKind::Conflict => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

/// Map a Kubernetes client error onto the taxonomy
pub fn classify_kube_error(err: &kube::Error) -> ErrorKind {
    match err {
        kube::Error::Api(ae) => match ae.code {
            404 => ErrorKind::NotFound,
            409 => ErrorKind::Conflict,
            401 | 403 => ErrorKind::Auth,
            400 | 422 => ErrorKind::Validation,
            _ => ErrorKind::Transient,
        },
        kube::Error::SerdeError(_) => ErrorKind::Internal,
        _ => ErrorKind::Transient,
    }
}

/// Attach a [`Stage`] to the error side of a result
pub trait StageExt<T> {
    fn stage(self, stage: Stage) -> Result<T>;
}

impl<T> StageExt<T> for Result<T> {
    fn stage(self, stage: Stage) -> Result<T> {
        self.map_err(|e| e.at(stage))
    }
}
