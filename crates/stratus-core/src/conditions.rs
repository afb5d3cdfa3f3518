//! Ready and Synced conditions
//!
//! `Ready` reflects the state of the external object, `Synced` whether the
//! controller last succeeded in reconciling it. Users read both to tell a
//! provider outage apart from a broken spec.

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const TYPE_READY: &str = "Ready";
pub const TYPE_SYNCED: &str = "Synced";

pub const STATUS_TRUE: &str = "True";
pub const STATUS_FALSE: &str = "False";

pub const REASON_AVAILABLE: &str = "Available";
pub const REASON_CREATING: &str = "Creating";
pub const REASON_DELETING: &str = "Deleting";
pub const REASON_UNAVAILABLE: &str = "Unavailable";
pub const REASON_RECONCILE_SUCCESS: &str = "ReconcileSuccess";
pub const REASON_RECONCILE_ERROR: &str = "ReconcileError";
pub const REASON_RECONCILE_PAUSED: &str = "ReconcilePaused";
pub const REASON_REFERENCE_NOT_READY: &str = "ReferenceNotReady";

/// A single status condition
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition: Ready, Synced
    pub r#type: String,

    /// Status: True, False, Unknown
    pub status: String,

    /// Machine-readable reason
    pub reason: String,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Last transition time
    pub last_transition_time: String,
}

impl Condition {
    fn new(r#type: &str, status: &str, reason: &str, message: impl Into<String>) -> Self {
        Self {
            r#type: r#type.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: Utc::now().to_rfc3339(),
        }
    }

    /// External object exists and matches the desired state
    pub fn available() -> Self {
        Self::new(TYPE_READY, STATUS_TRUE, REASON_AVAILABLE, "")
    }

    /// External object is being created
    pub fn creating() -> Self {
        Self::new(TYPE_READY, STATUS_FALSE, REASON_CREATING, "")
    }

    /// External object is being deleted
    pub fn deleting() -> Self {
        Self::new(TYPE_READY, STATUS_FALSE, REASON_DELETING, "")
    }

    /// External object exists but cannot serve or be modified
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(TYPE_READY, STATUS_FALSE, REASON_UNAVAILABLE, message)
    }

    pub fn reconcile_success() -> Self {
        Self::new(TYPE_SYNCED, STATUS_TRUE, REASON_RECONCILE_SUCCESS, "")
    }

    pub fn reconcile_error(message: impl Into<String>) -> Self {
        Self::new(TYPE_SYNCED, STATUS_FALSE, REASON_RECONCILE_ERROR, message)
    }

    pub fn reconcile_paused(message: impl Into<String>) -> Self {
        Self::new(TYPE_SYNCED, STATUS_FALSE, REASON_RECONCILE_PAUSED, message)
    }

    /// Waiting on a referenced resource
    pub fn reference_not_ready(message: impl Into<String>) -> Self {
        Self::new(TYPE_SYNCED, STATUS_FALSE, REASON_REFERENCE_NOT_READY, message)
    }

    pub fn is_true(&self) -> bool {
        self.status == STATUS_TRUE
    }

    /// Equal ignoring the transition time
    pub fn equivalent(&self, other: &Condition) -> bool {
        self.r#type == other.r#type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Insert or replace a condition by type.
///
/// The previous transition time is kept when the status does not change.
/// Returns true if anything other than the timestamp changed.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) -> bool {
    match conditions
        .iter_mut()
        .find(|c| c.r#type == condition.r#type)
    {
        Some(existing) => {
            if existing.equivalent(&condition) {
                return false;
            }
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time.clone();
            }
            *existing = condition;
            true
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}

/// Find a condition by type
pub fn get_condition<'a>(conditions: &'a [Condition], r#type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == r#type)
}

/// Check whether the condition of the given type is True
pub fn is_condition_true(conditions: &[Condition], r#type: &str) -> bool {
    get_condition(conditions, r#type).is_some_and(Condition::is_true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_condition_inserts_and_replaces() {
        let mut conditions = vec![];
        assert!(set_condition(&mut conditions, Condition::creating()));
        assert!(set_condition(&mut conditions, Condition::reconcile_success()));
        assert_eq!(conditions.len(), 2);

        assert!(set_condition(&mut conditions, Condition::available()));
        assert_eq!(conditions.len(), 2);

        let ready = get_condition(&conditions, TYPE_READY).unwrap();
        assert_eq!(ready.reason, REASON_AVAILABLE);
        assert!(ready.is_true());
    }

    #[test]
    fn test_set_condition_no_change() {
        let mut conditions = vec![Condition::available()];
        assert!(!set_condition(&mut conditions, Condition::available()));
    }

    #[test]
    fn test_transition_time_kept_when_status_unchanged() {
        let mut first = Condition::creating();
        first.last_transition_time = "2024-01-01T00:00:00+00:00".to_string();
        let mut conditions = vec![first];

        set_condition(&mut conditions, Condition::unavailable("resize in progress"));

        let ready = get_condition(&conditions, TYPE_READY).unwrap();
        assert_eq!(ready.reason, REASON_UNAVAILABLE);
        assert_eq!(ready.message, "resize in progress");
        assert_eq!(ready.last_transition_time, "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_is_condition_true() {
        let conditions = vec![Condition::available(), Condition::reconcile_error("boom")];
        assert!(is_condition_true(&conditions, TYPE_READY));
        assert!(!is_condition_true(&conditions, TYPE_SYNCED));
        assert!(!is_condition_true(&[], TYPE_READY));
    }
}
