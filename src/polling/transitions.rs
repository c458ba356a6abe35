//! States and transition rules for the worker and orchestrator machines.
//!
//! Pure functions only. The async drivers in `worker.rs` and `orchestrator.rs`
//! perform the I/O and feed outcomes back through these rules, so every
//! routing decision (including cancel priority) can be tested without a runtime.

use std::fmt;

use super::message::WorkerReport;
use crate::types::{JobMeta, JobRequest};

// ─── Worker ───────────────────────────────────────────────────────────────────

/// What the worker does after reading a status response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadDecision {
    /// STOP was requested.
    Stop,
    /// The backend reports the job cancelled.
    RemoteCancelled,
    /// More than `max_tries` polls were made.
    Exhausted,
    /// The status satisfies the resolved predicate.
    Resolved,
    /// Wait for the backoff pause, then poll again.
    Wait,
}

/// Inputs to the decision made in the worker's reading state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCheck {
    pub stop_requested: bool,
    pub remote_cancelled: bool,
    /// Poll count, already incremented for the response being read.
    pub tries: u32,
    pub max_tries: u32,
    pub resolved: bool,
}

/// Decides the worker's next state after a status response.
///
/// Checks run in priority order: stop, remote cancellation, try ceiling,
/// resolution. A stop therefore wins even over a resolving response.
pub fn read_decision(check: ReadCheck) -> ReadDecision {
    if check.stop_requested {
        ReadDecision::Stop
    } else if check.remote_cancelled {
        ReadDecision::RemoteCancelled
    } else if check.tries > check.max_tries {
        ReadDecision::Exhausted
    } else if check.resolved {
        ReadDecision::Resolved
    } else {
        ReadDecision::Wait
    }
}

// ─── Orchestrator ─────────────────────────────────────────────────────────────

/// Where a resumed job re-enters processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePoint {
    /// The job has identifiers but was still polling.
    Polling,
    /// The job finished polling but its result was never fetched.
    Resolving,
}

/// Active sub-states of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStep {
    Instantiating,
    Polling,
    Cancelling,
    Resolving,
}

/// Terminal outcomes of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Terminal {
    Resolved,
    Failed,
    Cancelled,
}

/// The orchestrator's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Resuming(ResumePoint),
    Processing(ProcessingStep),
    Done(Terminal),
}

impl OrchestratorState {
    /// Dotted state path, e.g. `processing.polling`.
    pub fn name(&self) -> &'static str {
        match self {
            OrchestratorState::Idle => "idle",
            OrchestratorState::Resuming(ResumePoint::Polling) => "resuming.polling",
            OrchestratorState::Resuming(ResumePoint::Resolving) => "resuming.resolving",
            OrchestratorState::Processing(ProcessingStep::Instantiating) => {
                "processing.instantiating"
            }
            OrchestratorState::Processing(ProcessingStep::Polling) => "processing.polling",
            OrchestratorState::Processing(ProcessingStep::Cancelling) => "processing.cancelling",
            OrchestratorState::Processing(ProcessingStep::Resolving) => "processing.resolving",
            OrchestratorState::Done(Terminal::Resolved) => "done.resolved",
            OrchestratorState::Done(Terminal::Failed) => "done.failed",
            OrchestratorState::Done(Terminal::Cancelled) => "done.cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrchestratorState::Done(_))
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Routes a FETCH received in `idle`.
///
/// Returns `None` when the request carries nothing that identifies the job;
/// the caller fails the job immediately.
pub fn route_fetch(meta: &JobMeta, request: &JobRequest) -> Option<OrchestratorState> {
    if request.polling_done {
        Some(OrchestratorState::Resuming(ResumePoint::Resolving))
    } else if request.job_id.is_some() {
        Some(OrchestratorState::Resuming(ResumePoint::Polling))
    } else if !meta.ui_key.is_blank() || request.ui_key.as_ref().is_some_and(|k| !k.is_blank()) {
        Some(OrchestratorState::Processing(ProcessingStep::Instantiating))
    } else {
        None
    }
}

/// The processing state a resume point continues into.
pub fn resume_target(point: ResumePoint) -> OrchestratorState {
    match point {
        ResumePoint::Polling => OrchestratorState::Processing(ProcessingStep::Polling),
        ResumePoint::Resolving => OrchestratorState::Processing(ProcessingStep::Resolving),
    }
}

/// Next state after `instantiate` settles.
pub fn after_instantiate(cancel: bool, succeeded: bool) -> OrchestratorState {
    match (cancel, succeeded) {
        (true, true) => OrchestratorState::Processing(ProcessingStep::Cancelling),
        (true, false) => OrchestratorState::Done(Terminal::Cancelled),
        (false, true) => OrchestratorState::Processing(ProcessingStep::Polling),
        (false, false) => OrchestratorState::Done(Terminal::Failed),
    }
}

/// Next state when a worker report arrives in `processing.polling`.
///
/// A pending cancel diverts every outcome to `done.cancelled`.
pub fn on_worker_report(cancel: bool, report: &WorkerReport) -> OrchestratorState {
    match report {
        WorkerReport::Cancelled { .. } => OrchestratorState::Done(Terminal::Cancelled),
        _ if cancel => OrchestratorState::Done(Terminal::Cancelled),
        WorkerReport::Resolved { .. } => OrchestratorState::Processing(ProcessingStep::Resolving),
        WorkerReport::Failed { .. } => OrchestratorState::Done(Terminal::Failed),
        // Only sent after STOP, which is only signalled when leaving polling.
        WorkerReport::Stopped { .. } => OrchestratorState::Done(Terminal::Failed),
    }
}

/// Next state after a backend operation that ends the job settles.
pub fn settle(succeeded: bool, on_success: Terminal) -> OrchestratorState {
    if succeeded {
        OrchestratorState::Done(on_success)
    } else {
        OrchestratorState::Done(Terminal::Failed)
    }
}
