//! The backend contract consumed by the orchestration core.
//!
//! The core never talks to a transport directly. Everything it needs from the
//! remote side is expressed by [`JobBackend`]: four async operations and two
//! predicates over raw status payloads. The trait-based design enables:
//! - Scripted backends for testing
//! - The [`DryRunBackend`], which logs calls instead of performing them
//! - Any HTTP client the host application already uses

use std::future::Future;

use serde_json::Value;

use crate::types::{JobIds, JobMeta, JobRequest};

pub mod dry_run;
pub mod error;

pub use dry_run::DryRunBackend;
pub use error::{BackendError, Operation};

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Remote operations and status predicates for one kind of long-running job.
///
/// Implementations are shared between the orchestrator and its worker, so they
/// must be `Send + Sync`; the orchestrator holds them behind an `Arc`.
///
/// # Example (scripted backend for testing)
///
/// ```ignore
/// struct AlwaysReady;
///
/// impl JobBackend for AlwaysReady {
///     async fn instantiate(&self, _: &JobMeta, _: &JobRequest) -> Result<JobIds> {
///         Ok(JobIds::new("J1", "P1"))
///     }
///     async fn poll_status(&self, _: &JobMeta, _: &JobIds) -> Result<Value> {
///         Ok(json!({ "status": "done" }))
///     }
///     async fn fetch_result(&self, _: &JobMeta, _: &JobIds) -> Result<Value> {
///         Ok(json!({ "value": 42 }))
///     }
///     async fn cancel(&self, _: &JobMeta, _: &JobIds) -> Result<Value> {
///         Ok(Value::Null)
///     }
///     fn is_resolved(&self, status: &Value) -> bool {
///         status["status"] == "done"
///     }
/// }
/// ```
pub trait JobBackend: Send + Sync + 'static {
    /// Submits a new job. Called once per job; not idempotent.
    fn instantiate(
        &self,
        meta: &JobMeta,
        request: &JobRequest,
    ) -> impl Future<Output = Result<JobIds>> + Send;

    /// Fetches the raw status of a job. Called repeatedly; idempotent.
    fn poll_status(
        &self,
        meta: &JobMeta,
        ids: &JobIds,
    ) -> impl Future<Output = Result<Value>> + Send;

    /// Fetches the final payload. Called exactly once, after the job resolved.
    fn fetch_result(
        &self,
        meta: &JobMeta,
        ids: &JobIds,
    ) -> impl Future<Output = Result<Value>> + Send;

    /// Cancels a job on the backend. Called at most once per job.
    fn cancel(&self, meta: &JobMeta, ids: &JobIds) -> impl Future<Output = Result<Value>> + Send;

    /// Returns true if a status payload says the job has finished.
    fn is_resolved(&self, status: &Value) -> bool;

    /// Returns true if a status payload says the job was cancelled remotely.
    fn is_cancelled(&self, _status: &Value) -> bool {
        false
    }
}
