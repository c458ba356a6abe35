//! The polling worker: a child machine that polls one job until it settles.
//!
//! # State Machine
//!
//! ```text
//! polling ──ok──► reading ──wait──► waiting ──pause──► polling
//!    │               │
//!    │               ├─► done.stopped    (STOP requested)
//!    │               ├─► done.cancelled  (backend reports cancelled)
//!    │               ├─► done.failed     (tries > max_tries)
//!    │               └─► done.resolved   (resolved predicate)
//!    └──err──► done.failed
//! ```
//!
//! STOP is observed in every state: an in-flight poll or a pending pause is
//! dropped and the worker ends in `done.stopped`. Each `done` state sends
//! exactly one [`WorkerReport`] to the parent.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use super::backoff::BackoffConfig;
use super::message::WorkerReport;
use super::transitions::{ReadCheck, ReadDecision, read_decision};
use crate::backend::{JobBackend, Operation};
use crate::types::{JobIds, JobMeta};

/// The worker's mutable context.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerContext {
    pub ids: JobIds,
    /// Status responses read so far. Never decreases.
    pub tries: u32,
    /// Set once a status satisfied the resolved predicate.
    pub resolved: bool,
    pub max_tries: u32,
    pub delay: BackoffConfig,
}

impl WorkerContext {
    /// Creates a context for a job, continuing from `tries` earlier polls.
    pub fn new(ids: JobIds, tries: u32, max_tries: u32, delay: BackoffConfig) -> Self {
        WorkerContext {
            ids,
            tries,
            resolved: false,
            max_tries,
            delay,
        }
    }
}

/// Worker states. `Reading` carries the status being read.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerState {
    Polling,
    Reading(Value),
    Waiting,
    Done(WorkerReport),
}

impl WorkerState {
    fn name(&self) -> &'static str {
        match self {
            WorkerState::Polling => "polling",
            WorkerState::Reading(_) => "reading",
            WorkerState::Waiting => "waiting",
            WorkerState::Done(WorkerReport::Resolved { .. }) => "done.resolved",
            WorkerState::Done(WorkerReport::Failed { .. }) => "done.failed",
            WorkerState::Done(WorkerReport::Stopped { .. }) => "done.stopped",
            WorkerState::Done(WorkerReport::Cancelled { .. }) => "done.cancelled",
        }
    }
}

/// A worker polling one job on behalf of an orchestrator.
pub struct PollingWorker<B> {
    backend: Arc<B>,
    meta: JobMeta,
    ctx: WorkerContext,
    stop: CancellationToken,
    debug: bool,
}

impl<B: JobBackend> PollingWorker<B> {
    /// Creates a worker. `stop` is the parent's STOP signal.
    pub fn new(backend: Arc<B>, meta: JobMeta, ctx: WorkerContext, stop: CancellationToken) -> Self {
        PollingWorker {
            backend,
            meta,
            ctx,
            stop,
            debug: false,
        }
    }

    /// Logs every transition at debug level instead of trace.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Runs the worker as a task that sends its final report on `reports`.
    pub fn spawn(self, reports: mpsc::Sender<WorkerReport>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let report = self.run().await;
            // The parent may already be gone (aborted or finished); nothing to do then.
            let _ = reports.send(report).await;
        })
    }

    /// Drives the machine to a final state and returns its report.
    #[instrument(skip(self), fields(ui_key = %self.meta.ui_key, job_id = %self.ctx.ids.job_id))]
    pub async fn run(mut self) -> WorkerReport {
        let mut state = WorkerState::Polling;

        loop {
            let next = match state {
                WorkerState::Polling => self.poll().await,
                WorkerState::Reading(status) => self.read(status),
                WorkerState::Waiting => self.wait().await,
                WorkerState::Done(report) => return report,
            };
            self.log_transition(&next);
            state = next;
        }
    }

    async fn poll(&mut self) -> WorkerState {
        let backend = Arc::clone(&self.backend);
        let status = tokio::select! {
            biased;
            _ = self.stop.cancelled() => return self.stopped(),
            status = backend.poll_status(&self.meta, &self.ctx.ids) => status,
        };

        match status {
            Ok(status) => WorkerState::Reading(status),
            Err(e) => WorkerState::Done(WorkerReport::Failed {
                tries: self.ctx.tries,
                message: e.describe(Operation::PollStatus),
                status: None,
            }),
        }
    }

    fn read(&mut self, status: Value) -> WorkerState {
        self.ctx.tries = self.ctx.tries.saturating_add(1);

        let decision = read_decision(ReadCheck {
            stop_requested: self.stop.is_cancelled(),
            remote_cancelled: self.backend.is_cancelled(&status),
            tries: self.ctx.tries,
            max_tries: self.ctx.max_tries,
            resolved: self.backend.is_resolved(&status),
        });

        let tries = self.ctx.tries;
        match decision {
            ReadDecision::Stop => self.stopped(),
            ReadDecision::RemoteCancelled => {
                WorkerState::Done(WorkerReport::Cancelled { tries, status })
            }
            ReadDecision::Exhausted => WorkerState::Done(WorkerReport::Failed {
                tries,
                message: format!(
                    "job did not resolve within {} polls",
                    self.ctx.max_tries
                ),
                status: Some(status),
            }),
            ReadDecision::Resolved => {
                self.ctx.resolved = true;
                WorkerState::Done(WorkerReport::Resolved { tries, status })
            }
            ReadDecision::Wait => WorkerState::Waiting,
        }
    }

    async fn wait(&mut self) -> WorkerState {
        let pause = self.ctx.delay.pause(self.ctx.tries);
        trace!(?pause, tries = self.ctx.tries, "Waiting before next poll");

        tokio::select! {
            biased;
            _ = self.stop.cancelled() => self.stopped(),
            _ = tokio::time::sleep(pause) => WorkerState::Polling,
        }
    }

    fn stopped(&self) -> WorkerState {
        WorkerState::Done(WorkerReport::Stopped {
            tries: self.ctx.tries,
        })
    }

    fn log_transition(&self, next: &WorkerState) {
        if self.debug {
            debug!(to = next.name(), tries = self.ctx.tries, "Worker transition");
        } else {
            trace!(to = next.name(), tries = self.ctx.tries, "Worker transition");
        }
    }
}
