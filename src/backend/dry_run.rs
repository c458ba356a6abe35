//! A backend that logs operations instead of performing them.
//!
//! Used by the binary when no real transport is wired in, and handy for
//! exercising the dispatcher end to end. Every job resolves on its first poll.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Value, json};
use tracing::debug;

use super::{JobBackend, Result};
use crate::types::{JobIds, JobMeta, JobRequest};

/// Status value the dry-run backend reports for every job.
const RESOLVED_STATE: &str = "resolved";

/// Logging backend that answers every call with a placeholder payload.
#[derive(Debug, Default)]
pub struct DryRunBackend {
    next_job: AtomicU64,
}

impl DryRunBackend {
    /// Creates a new dry-run backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobBackend for DryRunBackend {
    fn instantiate(
        &self,
        meta: &JobMeta,
        request: &JobRequest,
    ) -> impl Future<Output = Result<JobIds>> + Send {
        let n = self.next_job.fetch_add(1, Ordering::Relaxed);
        debug!(
            ui_key = %meta.ui_key,
            feature = %meta.feature,
            has_params = request.params.is_some(),
            "DryRunBackend: instantiate logged (not executed)"
        );
        let ids = JobIds::new(format!("dry-run-{}", n), format!("dry-run-process-{}", n));
        async move { Ok(ids) }
    }

    fn poll_status(
        &self,
        meta: &JobMeta,
        ids: &JobIds,
    ) -> impl Future<Output = Result<Value>> + Send {
        debug!(ui_key = %meta.ui_key, job_id = %ids.job_id, "DryRunBackend: poll logged");
        async { Ok(json!({ "state": RESOLVED_STATE })) }
    }

    fn fetch_result(
        &self,
        meta: &JobMeta,
        ids: &JobIds,
    ) -> impl Future<Output = Result<Value>> + Send {
        debug!(ui_key = %meta.ui_key, job_id = %ids.job_id, "DryRunBackend: fetch logged");
        async { Ok(json!({ "matrix": { "headers": [], "rows": [] } })) }
    }

    fn cancel(&self, meta: &JobMeta, ids: &JobIds) -> impl Future<Output = Result<Value>> + Send {
        debug!(ui_key = %meta.ui_key, job_id = %ids.job_id, "DryRunBackend: cancel logged");
        async { Ok(Value::Null) }
    }

    fn is_resolved(&self, status: &Value) -> bool {
        status.get("state").and_then(Value::as_str) == Some(RESOLVED_STATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn instantiate_hands_out_distinct_ids() {
        let backend = DryRunBackend::new();
        let meta = JobMeta::new("slot", "matrix");

        let a = backend.instantiate(&meta, &JobRequest::new()).await.unwrap();
        let b = backend.instantiate(&meta, &JobRequest::new()).await.unwrap();

        assert_ne!(a.job_id, b.job_id);
    }

    #[tokio::test]
    async fn every_status_is_resolved() {
        let backend = DryRunBackend::new();
        let meta = JobMeta::new("slot", "matrix");
        let ids = JobIds::new("J1", "P1");

        let status = backend.poll_status(&meta, &ids).await.unwrap();

        assert!(backend.is_resolved(&status));
        assert!(!backend.is_cancelled(&status));
    }
}
