//! Reconciliation metrics

use std::time::Duration;

/// Result label of `stratus_reconcile_total`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileResult {
    Success,
    Error,
    Requeue,
}

impl ReconcileResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileResult::Success => "success",
            ReconcileResult::Error => "error",
            ReconcileResult::Requeue => "requeue",
        }
    }
}

/// Metrics for one managed-resource controller
#[derive(Clone)]
pub struct ControllerMetrics {
    kind: String,
    /// Histogram for reconciliation duration
    pub duration: metrics::Histogram,
}

impl ControllerMetrics {
    pub fn new(kind: impl Into<String>) -> Self {
        let kind = kind.into();
        Self {
            duration: metrics::histogram!("stratus_reconcile_duration_seconds", "kind" => kind.clone()),
            kind,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn reconciled(&self, result: ReconcileResult, elapsed: Duration) {
        metrics::counter!(
            "stratus_reconcile_total",
            "kind" => self.kind.clone(),
            "result" => result.as_str()
        )
        .increment(1);
        self.duration.record(elapsed.as_secs_f64());
    }

    /// Count one call against the external provider
    pub fn external_call(&self, operation: &'static str) {
        metrics::counter!(
            "stratus_external_calls_total",
            "kind" => self.kind.clone(),
            "operation" => operation
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_labels() {
        assert_eq!(ReconcileResult::Success.as_str(), "success");
        assert_eq!(ReconcileResult::Error.as_str(), "error");
        assert_eq!(ReconcileResult::Requeue.as_str(), "requeue");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let metrics = ControllerMetrics::new("Queue");
        metrics.reconciled(ReconcileResult::Success, Duration::from_millis(5));
        metrics.external_call("observe");
        assert_eq!(metrics.kind(), "Queue");
    }
}
