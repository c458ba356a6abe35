//! Messages exchanged between the orchestrator, its worker and the outside.
//!
//! The worker never touches orchestrator state. It sends exactly one
//! [`WorkerReport`] when it reaches a final state. The orchestrator receives
//! [`OrchestratorCommand`]s from its bridge and emits [`LifecycleEvent`]s.

use serde_json::Value;

use crate::types::JobEvent;

/// Final report a worker sends to its parent.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerReport {
    /// A status response satisfied the resolved predicate.
    Resolved {
        tries: u32,
        /// The status payload that resolved the job.
        status: Value,
    },

    /// A poll failed or the try ceiling was exceeded.
    Failed {
        tries: u32,
        message: String,
        /// The status payload that triggered the failure, if a poll succeeded.
        status: Option<Value>,
    },

    /// The worker acknowledged a STOP signal.
    Stopped { tries: u32 },

    /// A status response said the job was cancelled on the backend.
    Cancelled { tries: u32, status: Value },
}

impl WorkerReport {
    /// Number of status responses the worker read.
    pub fn tries(&self) -> u32 {
        match self {
            WorkerReport::Resolved { tries, .. }
            | WorkerReport::Failed { tries, .. }
            | WorkerReport::Stopped { tries }
            | WorkerReport::Cancelled { tries, .. } => *tries,
        }
    }

    /// Event name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            WorkerReport::Resolved { .. } => "POLLING_RESOLVED",
            WorkerReport::Failed { .. } => "POLLING_FAILED",
            WorkerReport::Stopped { .. } => "POLLING_STOPPED",
            WorkerReport::Cancelled { .. } => "POLLING_CANCELLED",
        }
    }
}

/// Commands accepted by a running orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorCommand {
    /// Start (or resume) the job described by the event.
    Fetch(JobEvent),

    /// Cancel the job. Sets the one-way cancel latch.
    Cancel,
}

/// Kind of an outward lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleKind {
    /// Polling has started (job identifiers are known).
    PollingStart,
    /// Polling has stopped, for whatever reason.
    PollingEnd,
    /// The job's result has been fetched. Terminal.
    PollingResolved,
    /// The job failed. Terminal.
    PollingError,
    /// The job was cancelled. Terminal.
    PollingCancelled,
}

impl LifecycleKind {
    /// Returns true for the three kinds that end a job.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleKind::PollingResolved
                | LifecycleKind::PollingError
                | LifecycleKind::PollingCancelled
        )
    }
}

/// An event emitted by an orchestrator, carrying the job's current state.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleEvent {
    pub kind: LifecycleKind,
    pub event: JobEvent,
}

impl LifecycleEvent {
    pub fn new(kind: LifecycleKind, event: JobEvent) -> Self {
        LifecycleEvent { kind, event }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}
