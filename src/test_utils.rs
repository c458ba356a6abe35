//! Shared test utilities: a scripted backend and arbitrary generators for
//! property-based testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use serde_json::{Value, json};
use tokio::sync::Notify;

use crate::backend::{JobBackend, Result};
use crate::types::{Feature, JobEvent, JobIds, JobMeta, JobRequest, UiKey};

pub fn pending_status() -> Value {
    json!({ "status": "pending" })
}

pub fn resolved_status() -> Value {
    json!({ "status": "resolved" })
}

pub fn cancelled_status() -> Value {
    json!({ "status": "cancelled" })
}

/// A backend answering from per-operation scripts.
///
/// When a script runs out the backend falls back to: ids `J1`/`P1`, a pending
/// status, a `{"value": 42}` result and a null cancel response. Gates hold a
/// call until the test calls `notify_one` on them.
#[derive(Default)]
pub struct ScriptedBackend {
    instantiations: Mutex<VecDeque<Result<JobIds>>>,
    statuses: Mutex<VecDeque<Result<Value>>>,
    results: Mutex<VecDeque<Result<Value>>>,
    cancellations: Mutex<VecDeque<Result<Value>>>,

    instantiate_gate: Option<Arc<Notify>>,
    poll_gate: Option<Arc<Notify>>,
    fetch_gate: Option<Arc<Notify>>,

    instantiate_calls: AtomicU32,
    poll_calls: AtomicU32,
    fetch_calls: AtomicU32,
    cancelled: Mutex<Vec<JobIds>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instantiations(self, script: Vec<Result<JobIds>>) -> Self {
        *self.instantiations.lock().unwrap() = script.into();
        self
    }

    pub fn with_statuses(self, script: Vec<Result<Value>>) -> Self {
        *self.statuses.lock().unwrap() = script.into();
        self
    }

    pub fn with_results(self, script: Vec<Result<Value>>) -> Self {
        *self.results.lock().unwrap() = script.into();
        self
    }

    pub fn with_cancellations(self, script: Vec<Result<Value>>) -> Self {
        *self.cancellations.lock().unwrap() = script.into();
        self
    }

    pub fn with_instantiate_gate(mut self, gate: Arc<Notify>) -> Self {
        self.instantiate_gate = Some(gate);
        self
    }

    pub fn with_poll_gate(mut self, gate: Arc<Notify>) -> Self {
        self.poll_gate = Some(gate);
        self
    }

    pub fn with_fetch_gate(mut self, gate: Arc<Notify>) -> Self {
        self.fetch_gate = Some(gate);
        self
    }

    pub fn instantiate_calls(&self) -> u32 {
        self.instantiate_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> u32 {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Identifiers passed to every `cancel` call, in order.
    pub fn cancelled(&self) -> Vec<JobIds> {
        self.cancelled.lock().unwrap().clone()
    }
}

async fn pass(gate: &Option<Arc<Notify>>) {
    if let Some(gate) = gate {
        gate.notified().await;
    }
}

impl JobBackend for ScriptedBackend {
    async fn instantiate(&self, _meta: &JobMeta, _request: &JobRequest) -> Result<JobIds> {
        self.instantiate_calls.fetch_add(1, Ordering::SeqCst);
        pass(&self.instantiate_gate).await;
        let next = self.instantiations.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(JobIds::new("J1", "P1")))
    }

    async fn poll_status(&self, _meta: &JobMeta, _ids: &JobIds) -> Result<Value> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        pass(&self.poll_gate).await;
        let next = self.statuses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(pending_status()))
    }

    async fn fetch_result(&self, _meta: &JobMeta, _ids: &JobIds) -> Result<Value> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        pass(&self.fetch_gate).await;
        let next = self.results.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(json!({ "value": 42 })))
    }

    async fn cancel(&self, _meta: &JobMeta, ids: &JobIds) -> Result<Value> {
        self.cancelled.lock().unwrap().push(ids.clone());
        let next = self.cancellations.lock().unwrap().pop_front();
        next.unwrap_or(Ok(Value::Null))
    }

    fn is_resolved(&self, status: &Value) -> bool {
        status["status"] == "resolved"
    }

    fn is_cancelled(&self, status: &Value) -> bool {
        status["status"] == "cancelled"
    }
}

pub fn arb_ui_key() -> impl Strategy<Value = UiKey> {
    "[a-z][a-z0-9_]{0,15}".prop_map(UiKey::from)
}

pub fn arb_feature() -> impl Strategy<Value = Feature> {
    prop_oneof![Just("ETL"), Just("MATRIX"), Just("REPORT")].prop_map(Feature::from)
}

pub fn arb_job_event() -> impl Strategy<Value = JobEvent> {
    (arb_ui_key(), arb_feature(), any::<bool>(), 0u32..20).prop_map(
        |(ui_key, feature, has_job, tries)| {
            let mut request = if has_job {
                JobRequest::for_job(JobIds::new(format!("J-{}", ui_key), "P1"))
            } else {
                JobRequest::new()
            };
            request.tries = tries;
            JobEvent::new(JobMeta { ui_key, feature }, request)
        },
    )
}
