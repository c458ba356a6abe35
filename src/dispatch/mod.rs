//! Job dispatch: validates commands, runs jobs, and tracks the pending ones.
//!
//! # Architecture
//!
//! ```text
//! Action ──► JobDispatcher::handle ──► PendingTracker ──► outbound pipeline
//!                   │                        ▲
//!                   ▼                        │ lifecycle actions
//!              JobChannel ──► relay task ────┘
//! ```
//!
//! The tracker publishes snapshots that a single persister task writes to a
//! [`StateStore`](crate::persistence::StateStore). On startup,
//! [`JobDispatcher::rehydrate`] replays the persisted records as FETCHes.

pub mod action;
pub mod dispatcher;
pub mod pending;

#[cfg(test)]
mod tests;

pub use action::{
    Action, ActionFailure, ActionKind, CommandEvent, CommandMeta, Notice, NoticeLevel,
    ValidationError,
};
pub use dispatcher::{DispatchError, JobDispatcher};
pub use pending::{PendingChange, PendingTracker, pending_change};
pub use crate::persistence::PendingRecord;
