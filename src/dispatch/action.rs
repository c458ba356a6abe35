//! Actions flowing through the dispatch pipeline.
//!
//! An [`Action`] is keyed by `(feature, kind)`. Inbound commands (`Fetch`,
//! `Resume`, `Cancel`) arrive from callers in a loosely-typed form and are
//! validated before anything is started. Lifecycle kinds are produced by
//! running jobs; `ActionError` and `Notice` are produced by the dispatcher.
//!
//! # Wire Format
//!
//! ```json
//! { "feature": "ETL", "kind": { "type": "FETCH", "event": { "meta": {...}, "request": {...} } } }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::polling::{LifecycleEvent, LifecycleKind};
use crate::types::{Feature, JobEvent, JobMeta, JobRequest, UiKey};

/// Why an inbound command was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("command has no request")]
    MissingRequest,

    #[error("command has no ui_key")]
    MissingUiKey,

    #[error("command has no feature")]
    MissingFeature,

    #[error("command feature {found} does not match action feature {expected}")]
    FeatureMismatch { expected: Feature, found: Feature },

    #[error("resume requires a job_id")]
    MissingJobId,
}

/// Routing metadata as sent by callers; every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_key: Option<UiKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature: Option<Feature>,
}

impl CommandMeta {
    pub fn new(ui_key: impl Into<UiKey>, feature: impl Into<Feature>) -> Self {
        CommandMeta {
            ui_key: Some(ui_key.into()),
            feature: Some(feature.into()),
        }
    }

    /// Checks the metadata against the action's feature.
    pub fn validate(&self, feature: &Feature) -> Result<JobMeta, ValidationError> {
        let ui_key = self.ui_key()?;
        let found = self
            .feature
            .clone()
            .filter(|f| !f.is_blank())
            .ok_or(ValidationError::MissingFeature)?;
        if &found != feature {
            return Err(ValidationError::FeatureMismatch {
                expected: feature.clone(),
                found,
            });
        }
        Ok(JobMeta {
            ui_key,
            feature: found,
        })
    }

    /// Checks the target of a CANCEL.
    ///
    /// A CANCEL only has to name the `ui_key`; a missing feature is taken
    /// from the action.
    pub fn validate_cancel(&self, feature: &Feature) -> Result<JobMeta, ValidationError> {
        match &self.feature {
            Some(_) => self.validate(feature),
            None if feature.is_blank() => Err(ValidationError::MissingFeature),
            None => Ok(JobMeta {
                ui_key: self.ui_key()?,
                feature: feature.clone(),
            }),
        }
    }

    fn ui_key(&self) -> Result<UiKey, ValidationError> {
        self.ui_key
            .clone()
            .filter(|key| !key.is_blank())
            .ok_or(ValidationError::MissingUiKey)
    }
}

impl From<JobMeta> for CommandMeta {
    fn from(meta: JobMeta) -> Self {
        CommandMeta {
            ui_key: Some(meta.ui_key),
            feature: Some(meta.feature),
        }
    }
}

/// A fetch or resume command as sent by callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandEvent {
    pub meta: CommandMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<JobRequest>,
}

impl CommandEvent {
    pub fn new(meta: CommandMeta, request: JobRequest) -> Self {
        CommandEvent {
            meta,
            request: Some(request),
        }
    }

    /// Validates the command into a job event.
    ///
    /// `require_job_id` is set for RESUME, which continues a job the backend
    /// already knows about.
    pub fn validate(
        &self,
        feature: &Feature,
        require_job_id: bool,
    ) -> Result<JobEvent, ValidationError> {
        let request = self
            .request
            .clone()
            .ok_or(ValidationError::MissingRequest)?;
        let meta = self.meta.validate(feature)?;
        if require_job_id && request.job_id.is_none() {
            return Err(ValidationError::MissingJobId);
        }
        Ok(JobEvent::new(meta, request))
    }
}

impl From<JobEvent> for CommandEvent {
    fn from(event: JobEvent) -> Self {
        CommandEvent {
            meta: event.meta.into(),
            request: Some(event.request),
        }
    }
}

/// A rejected command, reported instead of crashing the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionFailure {
    /// Type of the rejected action, e.g. `FETCH`.
    pub action: String,
    pub message: String,
    pub meta: CommandMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A user-facing message about a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub ui_key: UiKey,
}

impl Notice {
    pub fn info(ui_key: UiKey, message: impl Into<String>) -> Self {
        Notice {
            level: NoticeLevel::Info,
            message: message.into(),
            ui_key,
        }
    }

    pub fn error(ui_key: UiKey, message: impl Into<String>) -> Self {
        Notice {
            level: NoticeLevel::Error,
            message: message.into(),
            ui_key,
        }
    }
}

/// What an action does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Fetch(CommandEvent),
    Resume(CommandEvent),
    Cancel(CommandMeta),
    PollingStart(JobEvent),
    PollingEnd(JobEvent),
    PollingResolved(JobEvent),
    PollingError(JobEvent),
    PollingCancelled(JobEvent),
    ActionError(ActionFailure),
    Notice(Notice),
}

impl ActionKind {
    /// The action type as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Fetch(_) => "FETCH",
            ActionKind::Resume(_) => "RESUME",
            ActionKind::Cancel(_) => "CANCEL",
            ActionKind::PollingStart(_) => "POLLING_START",
            ActionKind::PollingEnd(_) => "POLLING_END",
            ActionKind::PollingResolved(_) => "POLLING_RESOLVED",
            ActionKind::PollingError(_) => "POLLING_ERROR",
            ActionKind::PollingCancelled(_) => "POLLING_CANCELLED",
            ActionKind::ActionError(_) => "ACTION_ERROR",
            ActionKind::Notice(_) => "NOTICE",
        }
    }

    /// Returns true for the lifecycle kinds that end a job.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionKind::PollingResolved(_)
                | ActionKind::PollingError(_)
                | ActionKind::PollingCancelled(_)
        )
    }
}

/// A unit of work for the dispatcher, namespaced by feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub feature: Feature,
    pub kind: ActionKind,
}

impl Action {
    pub fn new(feature: impl Into<Feature>, kind: ActionKind) -> Self {
        Action {
            feature: feature.into(),
            kind,
        }
    }

    pub fn fetch(event: JobEvent) -> Self {
        Action::new(event.meta.feature.clone(), ActionKind::Fetch(event.into()))
    }

    pub fn resume(event: JobEvent) -> Self {
        Action::new(event.meta.feature.clone(), ActionKind::Resume(event.into()))
    }

    pub fn cancel(meta: JobMeta) -> Self {
        Action::new(meta.feature.clone(), ActionKind::Cancel(meta.into()))
    }

    pub fn notice(feature: Feature, notice: Notice) -> Self {
        Action::new(feature, ActionKind::Notice(notice))
    }

    /// Reports a rejected command.
    pub fn rejected(&self, error: &ValidationError) -> Self {
        let meta = match &self.kind {
            ActionKind::Fetch(command) | ActionKind::Resume(command) => command.meta.clone(),
            ActionKind::Cancel(meta) => meta.clone(),
            _ => CommandMeta::default(),
        };
        Action::new(
            self.feature.clone(),
            ActionKind::ActionError(ActionFailure {
                action: self.kind.name().to_string(),
                message: error.to_string(),
                meta,
            }),
        )
    }

    /// Wraps a lifecycle event from a running job.
    pub fn from_lifecycle(event: LifecycleEvent) -> Self {
        let feature = event.event.meta.feature.clone();
        let job = event.event;
        let kind = match event.kind {
            LifecycleKind::PollingStart => ActionKind::PollingStart(job),
            LifecycleKind::PollingEnd => ActionKind::PollingEnd(job),
            LifecycleKind::PollingResolved => ActionKind::PollingResolved(job),
            LifecycleKind::PollingError => ActionKind::PollingError(job),
            LifecycleKind::PollingCancelled => ActionKind::PollingCancelled(job),
        };
        Action::new(feature, kind)
    }
}
