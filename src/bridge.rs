//! Exposes a running orchestrator as an async stream of lifecycle events.
//!
//! [`JobChannel::open`] spawns the orchestrator and hands it FETCH. The caller
//! then pulls events with [`JobChannel::next`] and may inject CANCEL. The
//! stream ends after exactly one terminal event, or as soon as the channel is
//! closed.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::backend::JobBackend;
use crate::config::OrchestratorConfig;
use crate::polling::{LifecycleEvent, Orchestrator, OrchestratorCommand, Terminal};
use crate::types::JobEvent;

/// Closes a [`JobChannel`] from another task.
#[derive(Debug, Clone)]
pub struct ChannelCloser {
    commands: mpsc::UnboundedSender<OrchestratorCommand>,
    closed: CancellationToken,
}

impl ChannelCloser {
    /// Cancels the job and ends the stream. Idempotent.
    pub fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        // The orchestrator may already have finished; that is fine.
        let _ = self.commands.send(OrchestratorCommand::Cancel);
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// The event stream of one job.
pub struct JobChannel {
    events: mpsc::Receiver<LifecycleEvent>,
    closer: ChannelCloser,
    finished: bool,
    task: Option<JoinHandle<Option<Terminal>>>,
}

impl JobChannel {
    /// Starts an orchestrator for `event` and sends it FETCH.
    pub fn open<B: JobBackend>(backend: Arc<B>, config: OrchestratorConfig, event: JobEvent) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::channel(config.channel_buffer.max(1));

        debug!(ui_key = %event.meta.ui_key, feature = %event.meta.feature, "Opening job channel");
        // Queued before the orchestrator starts, so FETCH is always its first command.
        let _ = commands.send(OrchestratorCommand::Fetch(event));
        let task = tokio::spawn(Orchestrator::new(backend, config, command_rx, event_tx).run());

        JobChannel {
            events,
            closer: ChannelCloser {
                commands,
                closed: CancellationToken::new(),
            },
            finished: false,
            task: Some(task),
        }
    }

    /// Returns the next lifecycle event, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<LifecycleEvent> {
        if self.finished || self.closer.is_closed() {
            return None;
        }

        let event = tokio::select! {
            biased;
            _ = self.closer.closed.cancelled() => None,
            event = self.events.recv() => event,
        };

        match event {
            Some(event) => {
                if event.is_terminal() {
                    self.finished = true;
                }
                Some(event)
            }
            None => {
                self.finished = true;
                None
            }
        }
    }

    /// Sends CANCEL but keeps the stream open, so the terminal
    /// `PollingCancelled` can still be observed.
    pub fn cancel(&self) {
        let _ = self.closer.commands.send(OrchestratorCommand::Cancel);
    }

    /// Cancels the job and ends the stream. Idempotent.
    pub fn close(&self) {
        self.closer.close();
    }

    /// Returns a handle that can close this channel from another task.
    pub fn closer(&self) -> ChannelCloser {
        self.closer.clone()
    }

    /// Waits for the orchestrator to finish and returns its outcome.
    pub async fn wait(mut self) -> Option<Terminal> {
        // Closing the receiver unblocks an orchestrator waiting to emit.
        self.events.close();
        match self.task.take() {
            Some(task) => task.await.ok().flatten(),
            None => None,
        }
    }
}

impl Drop for JobChannel {
    fn drop(&mut self) {
        self.closer.close();
    }
}
