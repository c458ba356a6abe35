//! Job requests and the events that carry them.
//!
//! A [`JobEvent`] is the unit that flows through the whole core: fetch commands
//! produce one, the orchestrator accumulates outcome data into its request, and
//! lifecycle events and pending-request records carry the latest copy.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::{Feature, JobId, ProcessId, UiKey};

/// Routing metadata for a job: which UI slot asked for it and which feature owns it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobMeta {
    pub ui_key: UiKey,
    pub feature: Feature,
}

impl JobMeta {
    pub fn new(ui_key: impl Into<UiKey>, feature: impl Into<Feature>) -> Self {
        JobMeta {
            ui_key: ui_key.into(),
            feature: feature.into(),
        }
    }
}

/// Identifiers assigned by the backend once a job has been accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobIds {
    pub job_id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<ProcessId>,
}

impl JobIds {
    pub fn new(job_id: impl Into<JobId>, process_id: impl Into<ProcessId>) -> Self {
        JobIds {
            job_id: job_id.into(),
            process_id: Some(process_id.into()),
        }
    }

    /// Identifiers for a backend that does not hand out process ids.
    pub fn job_only(job_id: impl Into<JobId>) -> Self {
        JobIds {
            job_id: job_id.into(),
            process_id: None,
        }
    }
}

/// One unit of remote work, plus the outcome accumulated while it runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_key: Option<UiKey>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<ProcessId>,

    /// Ceiling on poll attempts. `None` means the configured default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tries: Option<u32>,

    /// Poll attempts made so far.
    pub tries: u32,

    /// The job finished polling but its result was never fetched.
    pub polling_done: bool,

    /// Wire-format work order handed to `instantiate`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,

    /// Result payload, set once the job resolves.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    pub error: bool,

    pub cancelled: bool,

    /// Human-readable failure description when `error` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl JobRequest {
    /// Creates an empty request; the orchestrator will instantiate a new job.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a request for a job the backend already knows about.
    pub fn for_job(ids: JobIds) -> Self {
        JobRequest {
            job_id: Some(ids.job_id),
            process_id: ids.process_id,
            ..Self::default()
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = Some(max_tries);
        self
    }

    pub fn with_polling_done(mut self, done: bool) -> Self {
        self.polling_done = done;
        self
    }

    /// Returns the backend identifiers, if the job has been instantiated.
    pub fn ids(&self) -> Option<JobIds> {
        self.job_id.as_ref().map(|job_id| JobIds {
            job_id: job_id.clone(),
            process_id: self.process_id.clone(),
        })
    }

    /// Merges identifiers returned by `instantiate` into the request.
    pub fn merge_ids(&mut self, ids: JobIds) {
        self.job_id = Some(ids.job_id);
        if ids.process_id.is_some() {
            self.process_id = ids.process_id;
        }
    }

    /// Returns the effective poll ceiling.
    pub fn max_tries_or(&self, default: u32) -> u32 {
        self.max_tries.unwrap_or(default)
    }
}

/// A job request together with its routing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub meta: JobMeta,
    pub request: JobRequest,
}

impl JobEvent {
    pub fn new(meta: JobMeta, request: JobRequest) -> Self {
        JobEvent { meta, request }
    }

    /// Key of the pending-request record for this job within its feature.
    pub fn request_key(&self) -> &str {
        self.meta.ui_key.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn partial_request_deserializes_with_defaults() {
        let request: JobRequest = serde_json::from_value(json!({ "job_id": "J1" })).unwrap();

        assert_eq!(request.job_id, Some(JobId::from("J1")));
        assert_eq!(request.process_id, None);
        assert_eq!(request.tries, 0);
        assert!(!request.polling_done);
        assert!(!request.error);
        assert!(!request.cancelled);
    }

    #[test]
    fn empty_fields_are_not_serialized() {
        let json = serde_json::to_value(JobRequest::new()).unwrap();

        assert_eq!(
            json,
            json!({ "tries": 0, "polling_done": false, "error": false, "cancelled": false })
        );
    }

    #[test]
    fn ids_require_job_id() {
        let mut request = JobRequest::new();
        assert!(request.ids().is_none());

        request.process_id = Some(ProcessId::from("P1"));
        assert!(request.ids().is_none());

        request.job_id = Some(JobId::from("J1"));
        assert_eq!(request.ids(), Some(JobIds::new("J1", "P1")));
    }

    #[test]
    fn merge_ids_keeps_known_process_id() {
        let mut request = JobRequest::for_job(JobIds::new("J1", "P1"));
        request.merge_ids(JobIds::job_only("J2"));

        assert_eq!(request.job_id, Some(JobId::from("J2")));
        assert_eq!(request.process_id, Some(ProcessId::from("P1")));
    }

    #[test]
    fn max_tries_falls_back_to_default() {
        assert_eq!(JobRequest::new().max_tries_or(15), 15);
        assert_eq!(JobRequest::new().with_max_tries(3).max_tries_or(15), 3);
    }

    #[test]
    fn request_key_is_ui_key() {
        let event = JobEvent::new(JobMeta::new("matrix-panel", "matrix"), JobRequest::new());
        assert_eq!(event.request_key(), "matrix-panel");
    }
}
