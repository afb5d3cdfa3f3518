//! Tracking of asynchronous provider operations
//!
//! Some AWS APIs (e.g. Cloud Map namespaces) answer a create, update or
//! delete with an operation id instead of the finished object. The id is kept
//! in the `stratus.dev/operation-id` annotation and polled on every observe
//! until the operation settles.

use crate::conditions::Condition;
use crate::error::{ProviderError, Result, Stage, StageExt};
use crate::external::ExternalObservation;
use crate::resource::{
    clear_operation_id, external_name, is_being_deleted, operation_id, set_external_name,
};
use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Lifecycle of an asynchronous operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Submitted,
    Pending,
    Success,
    Fail,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Success | OperationStatus::Fail)
    }
}

impl FromStr for OperationStatus {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SUBMITTED" => Ok(OperationStatus::Submitted),
            "PENDING" => Ok(OperationStatus::Pending),
            "SUCCESS" => Ok(OperationStatus::Success),
            "FAIL" | "FAILED" => Ok(OperationStatus::Fail),
            other => Err(ProviderError::Internal(format!(
                "unknown operation status {other}"
            ))),
        }
    }
}

/// A provider operation as reported by the provider
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub id: String,
    pub status: OperationStatus,
    /// Target type to identifier, e.g. `NAMESPACE -> ns-123`
    pub targets: BTreeMap<String, String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl Operation {
    fn failure_message(&self) -> String {
        match (&self.error_code, &self.error_message) {
            (Some(code), Some(msg)) => format!("operation {} failed: {code}: {msg}", self.id),
            (None, Some(msg)) => format!("operation {} failed: {msg}", self.id),
            (Some(code), None) => format!("operation {} failed: {code}", self.id),
            (None, None) => format!("operation {} failed", self.id),
        }
    }
}

/// Looks up operations by id
#[async_trait]
pub trait OperationPoller: Send + Sync {
    /// `NotFound` if the provider no longer knows the operation
    async fn get_operation(&self, id: &str) -> Result<Operation>;
}

/// Poll the operation recorded on `obj`, if any.
///
/// - no operation id: `None`, observe normally
/// - submitted or pending: an in-progress observation; a create reports
///   `Creating`, anything else keeps the object as existing
/// - success: the identifier under `target` becomes the external name (if
///   none is set), the id is cleared and `None` lets observe continue
/// - fail: `Unavailable` with the provider message; the id is left in place.
///   While deleting the id is dropped instead: a failed create reports the
///   object absent, any other failure lets observe continue so the delete
///   is issued again
/// - unknown to the provider: the id is cleared and observe continues
pub async fn observe_operation<K: Resource>(
    poller: &dyn OperationPoller,
    obj: &mut K,
    target: &str,
) -> Result<Option<ExternalObservation>> {
    let Some(id) = operation_id(obj).map(str::to_string) else {
        return Ok(None);
    };
    let creating = external_name(obj).is_none();

    let op = match poller.get_operation(&id).await {
        Ok(op) => op,
        Err(e) if e.is_not_found() => {
            warn!(resource = %obj.name_any(), operation = %id, "Operation no longer known, dropping it");
            clear_operation_id(obj);
            return Ok(None);
        }
        Err(e) => return Err(e).stage(Stage::GetOperation),
    };

    match op.status {
        OperationStatus::Submitted | OperationStatus::Pending => {
            debug!(resource = %obj.name_any(), operation = %id, status = ?op.status, "Operation in flight");
            let ready = if creating {
                Condition::creating()
            } else {
                Condition::unavailable(format!("operation {id} in progress"))
            };
            Ok(Some(ExternalObservation::in_progress(!creating, ready)))
        }
        OperationStatus::Success => {
            if creating {
                let target_id = op.targets.get(target).cloned().ok_or_else(|| {
                    ProviderError::Internal(format!(
                        "operation {id} succeeded without a {target} target"
                    ))
                    .at(Stage::GetOperation)
                })?;
                info!(resource = %obj.name_any(), operation = %id, external_name = %target_id, "Operation succeeded");
                set_external_name(obj, target_id);
            }
            clear_operation_id(obj);
            Ok(None)
        }
        OperationStatus::Fail if is_being_deleted(obj) => {
            warn!(resource = %obj.name_any(), operation = %id, error = %op.failure_message(), "Operation failed while deleting, dropping it");
            clear_operation_id(obj);
            if creating {
                return Ok(Some(ExternalObservation::absent()));
            }
            Ok(None)
        }
        OperationStatus::Fail => {
            Err(ProviderError::Unavailable(op.failure_message()).at(Stage::GetOperation))
        }
    }
}
