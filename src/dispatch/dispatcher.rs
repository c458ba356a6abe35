//! The dispatch middleware in front of the application's action pipeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::action::{Action, ActionKind, Notice, ValidationError};
use super::pending::{PendingChange, PendingTracker};
use crate::backend::JobBackend;
use crate::bridge::{ChannelCloser, JobChannel};
use crate::config::OrchestratorConfig;
use crate::persistence::{PendingSnapshot, StateStore};
use crate::types::{Feature, JobEvent, JobMeta, UiKey};

/// Errors that end dispatching.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The receiver of outbound actions was dropped.
    #[error("outbound action pipeline is closed")]
    PipelineClosed,
}

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

type JobKey = (Feature, UiKey);

/// A bridge the dispatcher is relaying events from.
struct ActiveJob {
    /// Distinguishes a job from a later one registered under the same key.
    seq: u64,
    closer: ChannelCloser,
}

struct Inner<B> {
    backend: Arc<B>,
    config: OrchestratorConfig,
    tracker: PendingTracker,
    outbound: mpsc::Sender<Action>,
    active: Mutex<HashMap<JobKey, ActiveJob>>,
    next_seq: AtomicU64,
}

/// Routes job commands to bridges and relays their lifecycle events.
///
/// Every action passes through the [`PendingTracker`] before it is forwarded
/// to the outbound pipeline. At most one job runs per `(feature, ui_key)`: a
/// second FETCH closes the first job's bridge.
pub struct JobDispatcher<B> {
    inner: Arc<Inner<B>>,
}

impl<B> Clone for JobDispatcher<B> {
    fn clone(&self) -> Self {
        JobDispatcher {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// What `handle` does with an action.
enum Route {
    Start(JobEvent),
    Stop(JobMeta),
    Reject(ValidationError),
    Forward,
}

impl<B: JobBackend> JobDispatcher<B> {
    /// Creates a dispatcher forwarding actions to `outbound`.
    pub fn new(backend: Arc<B>, config: OrchestratorConfig, outbound: mpsc::Sender<Action>) -> Self {
        JobDispatcher {
            inner: Arc::new(Inner {
                backend,
                config,
                tracker: PendingTracker::new(),
                outbound,
                active: Mutex::new(HashMap::new()),
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn tracker(&self) -> &PendingTracker {
        &self.inner.tracker
    }

    /// Number of jobs whose events are currently being relayed.
    pub fn active_jobs(&self) -> usize {
        self.inner.active().len()
    }

    /// Handles one action.
    ///
    /// Invalid commands are forwarded as `ACTION_ERROR` and still return `Ok`.
    /// Only a closed outbound pipeline is an error.
    #[instrument(skip_all, fields(feature = %action.feature, action = action.kind.name()))]
    pub async fn handle(&self, action: Action) -> Result<()> {
        let route = match &action.kind {
            ActionKind::Fetch(command) => match command.validate(&action.feature, false) {
                Ok(event) => Route::Start(event),
                Err(e) => Route::Reject(e),
            },
            ActionKind::Resume(command) => match command.validate(&action.feature, true) {
                Ok(event) => Route::Start(event),
                Err(e) => Route::Reject(e),
            },
            ActionKind::Cancel(meta) => match meta.validate_cancel(&action.feature) {
                Ok(meta) => Route::Stop(meta),
                Err(e) => Route::Reject(e),
            },
            _ => Route::Forward,
        };

        match route {
            Route::Start(event) => {
                let (key, seq) = self.inner.register(&action, &event);
                if let Err(e) = self.inner.forward(action).await {
                    self.inner.abandon(&key);
                    return Err(e);
                }
                self.start(key, seq, event);
                Ok(())
            }
            Route::Stop(meta) => {
                self.inner.unregister(&action, &meta);
                self.inner.forward(action).await
            }
            Route::Reject(e) => {
                warn!(error = %e, "Rejected command");
                self.inner.forward(action.rejected(&e)).await
            }
            Route::Forward => {
                self.inner.tracker.observe(&action);
                self.inner.forward(action).await
            }
        }
    }

    /// Re-issues a FETCH for every pending record, each preceded by a notice.
    ///
    /// Returns the number of jobs resumed.
    #[instrument(skip_all, fields(pending = snapshot.len()))]
    pub async fn rehydrate(&self, snapshot: &PendingSnapshot) -> Result<usize> {
        let mut resumed = 0;
        for record in snapshot.records() {
            let event = record.event.clone();
            info!(ui_key = %event.meta.ui_key, feature = %record.feature, "Resuming pending job");

            let notice = Notice::info(
                event.meta.ui_key.clone(),
                format!("Resuming {} job {}", record.feature, event.meta.ui_key),
            );
            self.inner
                .forward(Action::notice(record.feature.clone(), notice))
                .await?;
            self.handle(Action::fetch(event)).await?;
            resumed += 1;
        }
        Ok(resumed)
    }

    /// Spawns the single task that writes published snapshots to `store`.
    ///
    /// The task exits once the dispatcher and all of its relays are gone.
    pub fn spawn_persister<S: StateStore>(&self, store: Arc<S>) -> JoinHandle<()> {
        let mut snapshots = self.inner.tracker.subscribe();
        tokio::spawn(async move {
            while snapshots.changed().await.is_ok() {
                let snapshot = snapshots.borrow_and_update().clone();
                match snapshot.save_to(store.as_ref()).await {
                    Ok(()) => debug!(pending = snapshot.len(), "Persisted pending requests"),
                    Err(e) => error!(error = %e, "Failed to persist pending requests"),
                }
            }
        })
    }

    fn start(&self, key: JobKey, seq: u64, event: JobEvent) {
        let channel = JobChannel::open(
            Arc::clone(&self.inner.backend),
            self.inner.config.clone(),
            event,
        );
        let closer = channel.closer();
        if let Some(previous) = self.inner.attach(&key, seq, closer) {
            debug!(ui_key = %key.1, "Closing superseded job");
            previous.close();
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.relay(key, seq, channel).await });
    }
}

impl<B: JobBackend> Inner<B> {
    fn active(&self) -> MutexGuard<'_, HashMap<JobKey, ActiveJob>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn forward(&self, action: Action) -> Result<()> {
        self.outbound
            .send(action)
            .await
            .map_err(|_| DispatchError::PipelineClosed)
    }

    /// Records a started job and reserves its sequence number.
    ///
    /// Done under the registry lock so that a relay of an older job for the
    /// same key cannot update the new record.
    fn register(&self, action: &Action, event: &JobEvent) -> (JobKey, u64) {
        let key = (event.meta.feature.clone(), event.meta.ui_key.clone());
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        let mut active = self.active();
        self.tracker.observe(action);
        if let Some(previous) = active.remove(&key) {
            info!(ui_key = %key.1, "Replacing running job");
            previous.closer.close();
        }
        drop(active);

        (key, seq)
    }

    /// Makes `seq` the current job for `key`, returning the closer of any job
    /// registered since.
    fn attach(&self, key: &JobKey, seq: u64, closer: ChannelCloser) -> Option<ChannelCloser> {
        let mut active = self.active();
        match active.get(key) {
            Some(current) if current.seq > seq => {
                // A newer FETCH already took the slot.
                Some(closer)
            }
            _ => active
                .insert(key.clone(), ActiveJob { seq, closer })
                .map(|previous| previous.closer),
        }
    }

    /// Drops the record of a job that was registered but never started.
    fn abandon(&self, key: &JobKey) {
        let active = self.active();
        if !active.contains_key(key) {
            self.tracker.apply(PendingChange::Remove {
                feature: key.0.clone(),
                key: key.1.clone(),
            });
        }
    }

    fn unregister(&self, action: &Action, meta: &JobMeta) {
        let key = (meta.feature.clone(), meta.ui_key.clone());
        let mut active = self.active();
        self.tracker.observe(action);
        let removed = active.remove(&key);
        drop(active);

        match removed {
            Some(job) => {
                info!(ui_key = %meta.ui_key, "Cancelling job");
                job.closer.close();
            }
            None => debug!(ui_key = %meta.ui_key, "CANCEL for a job that is not running"),
        }
    }

    /// Applies `action` to the tracker if `seq` is still the current job.
    fn observe_current(&self, key: &JobKey, seq: u64, action: &Action) -> bool {
        let active = self.active();
        if active.get(key).is_some_and(|job| job.seq == seq) {
            self.tracker.observe(action);
            true
        } else {
            false
        }
    }

    fn release(&self, key: &JobKey, seq: u64) {
        let mut active = self.active();
        if active.get(key).is_some_and(|job| job.seq == seq) {
            active.remove(key);
        }
    }

    async fn relay(self: Arc<Self>, key: JobKey, seq: u64, mut channel: JobChannel) {
        while let Some(event) = channel.next().await {
            let action = Action::from_lifecycle(event);
            if !self.observe_current(&key, seq, &action) {
                debug!(ui_key = %key.1, "Dropping event from a replaced job");
                break;
            }

            let notice = match &action.kind {
                ActionKind::PollingError(job) => Some(Notice::error(
                    job.meta.ui_key.clone(),
                    job.request
                        .reason
                        .clone()
                        .unwrap_or_else(|| "job failed".to_string()),
                )),
                _ => None,
            };

            if self.forward(action).await.is_err() {
                warn!(ui_key = %key.1, "Outbound pipeline closed, stopping relay");
                break;
            }
            if let Some(notice) = notice
                && self
                    .forward(Action::notice(key.0.clone(), notice))
                    .await
                    .is_err()
            {
                break;
            }
        }
        self.release(&key, seq);
    }
}
