//! The polling orchestrator: owns the full lifecycle of one job.
//!
//! # State Machine
//!
//! ```text
//!                  ┌─► resuming.polling ───────────────┐
//! idle ──FETCH──►──┼─► resuming.resolving ─────────────┼──────────┐
//!                  └─► processing.instantiating ──ok──►│          │
//!                                                      ▼          ▼
//!                                       processing.polling ─► processing.resolving
//!                                                │                    │
//!                                      CANCEL    ▼                    ▼
//!                                  processing.cancelling       done.resolved
//!                                                │
//!                                                ▼
//!                                          done.cancelled
//! ```
//!
//! Any backend failure ends in `done.failed`. The cancel latch is checked
//! before every message is handled, so a CANCEL that arrives together with a
//! worker's resolved report still cancels the job.
//!
//! Every `done` state emits exactly one terminal [`LifecycleEvent`]; nothing is
//! emitted after it.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::message::{LifecycleEvent, LifecycleKind, OrchestratorCommand, WorkerReport};
use super::transitions::{
    OrchestratorState, ProcessingStep, Terminal, after_instantiate, on_worker_report,
    resume_target, route_fetch, settle,
};
use super::worker::{PollingWorker, WorkerContext};
use crate::backend::{JobBackend, Operation};
use crate::config::OrchestratorConfig;
use crate::types::{JobEvent, JobMeta, JobRequest};

/// The worker currently owned by an orchestrator.
struct WorkerHandle {
    stop: CancellationToken,
    reports: mpsc::Receiver<WorkerReport>,
    task: JoinHandle<()>,
}

/// Mutable state for the job being orchestrated.
struct JobContext {
    meta: JobMeta,
    request: JobRequest,
    /// One-way latch, set only by a CANCEL command.
    cancel: bool,
    cancelled: bool,
    is_error: bool,
    worker: Option<WorkerHandle>,
}

impl JobContext {
    fn new(event: JobEvent) -> Self {
        JobContext {
            meta: event.meta,
            request: event.request,
            cancel: false,
            cancelled: false,
            is_error: false,
            worker: None,
        }
    }

    fn event(&self) -> JobEvent {
        JobEvent::new(self.meta.clone(), self.request.clone())
    }

    fn fail(&mut self, reason: impl Into<String>) -> OrchestratorState {
        self.request.reason = Some(reason.into());
        OrchestratorState::Done(Terminal::Failed)
    }
}

/// Drives one job from FETCH to a terminal lifecycle event.
///
/// Constructed by the bridge, which holds the other ends of the command and
/// event channels. See [`crate::bridge::JobChannel`].
pub struct Orchestrator<B> {
    backend: Arc<B>,
    config: OrchestratorConfig,
    commands: mpsc::UnboundedReceiver<OrchestratorCommand>,
    commands_open: bool,
    events: mpsc::Sender<LifecycleEvent>,
}

impl<B: JobBackend> Orchestrator<B> {
    pub fn new(
        backend: Arc<B>,
        config: OrchestratorConfig,
        commands: mpsc::UnboundedReceiver<OrchestratorCommand>,
        events: mpsc::Sender<LifecycleEvent>,
    ) -> Self {
        Orchestrator {
            backend,
            config,
            commands,
            commands_open: true,
            events,
        }
    }

    /// Runs the machine until the job reaches a terminal state.
    ///
    /// Returns `None` if the command channel closed before any FETCH arrived;
    /// no lifecycle events are emitted in that case.
    pub async fn run(mut self) -> Option<Terminal> {
        let event = self.idle().await?;
        let mut ctx = JobContext::new(event);

        let state = match route_fetch(&ctx.meta, &ctx.request) {
            Some(state) => state,
            None => ctx.fail("missing identifying information: no ui_key or job_id"),
        };
        Some(self.drive(&mut ctx, state).await)
    }

    async fn idle(&mut self) -> Option<JobEvent> {
        while let Some(command) = self.commands.recv().await {
            match command {
                OrchestratorCommand::Fetch(event) => return Some(event),
                OrchestratorCommand::Cancel => debug!("Ignoring CANCEL while idle"),
            }
        }
        self.commands_open = false;
        None
    }

    #[instrument(skip_all, fields(ui_key = %ctx.meta.ui_key, feature = %ctx.meta.feature))]
    async fn drive(&mut self, ctx: &mut JobContext, mut state: OrchestratorState) -> Terminal {
        info!(state = %state, job_id = ?ctx.request.job_id, "Job received");

        loop {
            let next = match state {
                OrchestratorState::Resuming(point) => {
                    info!(state = %state, "Resuming job");
                    resume_target(point)
                }
                OrchestratorState::Processing(ProcessingStep::Instantiating) => {
                    self.instantiate(ctx).await
                }
                OrchestratorState::Processing(ProcessingStep::Polling) => self.poll(ctx).await,
                OrchestratorState::Processing(ProcessingStep::Cancelling) => {
                    self.cancel_job(ctx).await
                }
                OrchestratorState::Processing(ProcessingStep::Resolving) => {
                    self.resolve(ctx).await
                }
                OrchestratorState::Done(terminal) => {
                    self.finish(ctx, terminal).await;
                    return terminal;
                }
                // Never re-entered once a job has been routed.
                OrchestratorState::Idle => ctx.fail("orchestrator returned to idle"),
            };
            self.log_transition(state, next);
            state = next;
        }
    }

    /// Applies a command received while a job is running.
    fn apply(&mut self, ctx: &mut JobContext, command: Option<OrchestratorCommand>) {
        match command {
            Some(OrchestratorCommand::Cancel) => {
                if !ctx.cancel {
                    info!("Cancel requested");
                }
                ctx.cancel = true;
            }
            Some(OrchestratorCommand::Fetch(_)) => {
                debug!("Ignoring FETCH for a job that is already running");
            }
            None => self.commands_open = false,
        }
    }

    async fn instantiate(&mut self, ctx: &mut JobContext) -> OrchestratorState {
        let backend = Arc::clone(&self.backend);
        let meta = ctx.meta.clone();
        let request = ctx.request.clone();
        let call = backend.instantiate(&meta, &request);
        tokio::pin!(call);

        // The call runs to completion even if a CANCEL arrives: the job may
        // already exist on the backend and must be cancelled there.
        let result = loop {
            tokio::select! {
                biased;
                command = self.commands.recv(), if self.commands_open => self.apply(ctx, command),
                result = &mut call => break result,
            }
        };

        match result {
            Ok(ids) => {
                info!(job_id = %ids.job_id, "Job instantiated");
                ctx.request.merge_ids(ids);
                after_instantiate(ctx.cancel, true)
            }
            Err(e) => {
                let next = after_instantiate(ctx.cancel, false);
                if next == OrchestratorState::Done(Terminal::Failed) {
                    warn!(error = %e, "Instantiate failed");
                    ctx.request.reason = Some(e.describe(Operation::Instantiate));
                }
                next
            }
        }
    }

    async fn poll(&mut self, ctx: &mut JobContext) -> OrchestratorState {
        let Some(ids) = ctx.request.ids() else {
            return ctx.fail("cannot poll a job without a job_id");
        };

        self.emit(LifecycleKind::PollingStart, ctx).await;

        let stop = CancellationToken::new();
        let (report_tx, reports) = mpsc::channel(1);
        let worker_ctx = WorkerContext::new(
            ids,
            ctx.request.tries,
            ctx.request.max_tries_or(self.config.max_tries),
            self.config.backoff,
        );
        let task = PollingWorker::new(
            Arc::clone(&self.backend),
            ctx.meta.clone(),
            worker_ctx,
            stop.clone(),
        )
        .with_debug(self.config.debug)
        .spawn(report_tx);
        let mut worker = WorkerHandle {
            stop,
            reports,
            task,
        };

        let next = loop {
            if ctx.cancel {
                break OrchestratorState::Processing(ProcessingStep::Cancelling);
            }
            tokio::select! {
                biased;
                command = self.commands.recv(), if self.commands_open => self.apply(ctx, command),
                report = worker.reports.recv() => match report {
                    Some(report) => break self.on_report(ctx, report),
                    None => break ctx.fail("polling worker exited without reporting"),
                },
            }
        };

        worker.stop.cancel();
        self.emit(LifecycleKind::PollingEnd, ctx).await;

        if next == OrchestratorState::Processing(ProcessingStep::Cancelling) {
            ctx.worker = Some(worker);
        }
        next
    }

    fn on_report(&self, ctx: &mut JobContext, report: WorkerReport) -> OrchestratorState {
        debug!(report = report.name(), tries = report.tries(), "Worker reported");
        ctx.request.tries = report.tries();

        match &report {
            WorkerReport::Resolved { .. } => ctx.request.polling_done = true,
            WorkerReport::Failed { message, .. } => {
                warn!(error = %message, "Polling failed");
                ctx.request.reason = Some(message.clone());
            }
            WorkerReport::Stopped { .. } => {
                ctx.request.reason = Some("polling stopped unexpectedly".to_string());
            }
            WorkerReport::Cancelled { .. } => info!("Job was cancelled on the backend"),
        }

        on_worker_report(ctx.cancel, &report)
    }

    async fn cancel_job(&mut self, ctx: &mut JobContext) -> OrchestratorState {
        let mut remote_cancelled = false;

        if let Some(mut worker) = ctx.worker.take() {
            worker.stop.cancel();
            if let Some(report) = self.await_ack(&mut worker).await {
                ctx.request.tries = report.tries();
                remote_cancelled = matches!(report, WorkerReport::Cancelled { .. });
            }
        }

        if remote_cancelled {
            return OrchestratorState::Done(Terminal::Cancelled);
        }
        let Some(ids) = ctx.request.ids() else {
            return OrchestratorState::Done(Terminal::Cancelled);
        };

        match self.backend.cancel(&ctx.meta, &ids).await {
            Ok(_) => settle(true, Terminal::Cancelled),
            Err(e) => {
                warn!(error = %e, job_id = %ids.job_id, "Backend cancel failed");
                ctx.request.reason = Some(e.describe(Operation::Cancel));
                settle(false, Terminal::Cancelled)
            }
        }
    }

    /// Waits for the worker's final report after STOP.
    ///
    /// Bounded by `stop_timeout`; a worker that does not answer in time is
    /// aborted and `None` is returned.
    async fn await_ack(&self, worker: &mut WorkerHandle) -> Option<WorkerReport> {
        let ack = worker.reports.recv();
        match self.config.stop_timeout {
            None => ack.await,
            Some(limit) => match tokio::time::timeout(limit, ack).await {
                Ok(report) => report,
                Err(_) => {
                    warn!(timeout = ?limit, "Worker did not acknowledge STOP, aborting it");
                    worker.task.abort();
                    None
                }
            },
        }
    }

    async fn resolve(&mut self, ctx: &mut JobContext) -> OrchestratorState {
        if ctx.cancel {
            return OrchestratorState::Done(Terminal::Cancelled);
        }
        let Some(ids) = ctx.request.ids() else {
            return ctx.fail("cannot fetch a result without a job_id");
        };

        let backend = Arc::clone(&self.backend);
        let meta = ctx.meta.clone();
        let call = backend.fetch_result(&meta, &ids);
        tokio::pin!(call);

        let result = loop {
            tokio::select! {
                biased;
                command = self.commands.recv(), if self.commands_open => {
                    self.apply(ctx, command);
                    if ctx.cancel {
                        return OrchestratorState::Done(Terminal::Cancelled);
                    }
                }
                result = &mut call => break result,
            }
        };

        match result {
            Ok(data) => {
                ctx.request.data = Some(data);
                settle(true, Terminal::Resolved)
            }
            Err(e) => {
                warn!(error = %e, job_id = %ids.job_id, "Fetching result failed");
                ctx.request.reason = Some(e.describe(Operation::FetchResult));
                settle(false, Terminal::Resolved)
            }
        }
    }

    async fn finish(&mut self, ctx: &mut JobContext, terminal: Terminal) {
        if let Some(worker) = ctx.worker.take() {
            worker.stop.cancel();
            worker.task.abort();
        }

        let kind = match terminal {
            Terminal::Resolved => {
                info!(tries = ctx.request.tries, "Job resolved");
                LifecycleKind::PollingResolved
            }
            Terminal::Failed => {
                ctx.is_error = true;
                ctx.request.error = true;
                if ctx.request.reason.is_none() {
                    ctx.request.reason = Some("job failed".to_string());
                }
                warn!(reason = ?ctx.request.reason, "Job failed");
                LifecycleKind::PollingError
            }
            Terminal::Cancelled => {
                ctx.cancelled = true;
                ctx.request.cancelled = true;
                info!("Job cancelled");
                LifecycleKind::PollingCancelled
            }
        };

        debug!(error = ctx.is_error, cancelled = ctx.cancelled, "Job settled");
        self.emit(kind, ctx).await;
    }

    async fn emit(&self, kind: LifecycleKind, ctx: &JobContext) {
        trace!(?kind, "Emitting lifecycle event");
        // The bridge may have been closed already; the job still runs to completion.
        let _ = self.events.send(LifecycleEvent::new(kind, ctx.event())).await;
    }

    fn log_transition(&self, from: OrchestratorState, to: OrchestratorState) {
        if self.config.debug {
            debug!(from = %from, to = %to, "Orchestrator transition");
        } else {
            trace!(from = %from, to = %to, "Orchestrator transition");
        }
    }
}
