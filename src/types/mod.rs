//! Core domain types for the job orchestration core.
//!
//! Identifiers are newtypes; requests and events are plain serde structs so
//! they can be persisted as pending-request records and replayed on startup.

pub mod ids;
pub mod request;

pub use ids::{Feature, JobId, ProcessId, UiKey};
pub use request::{JobEvent, JobIds, JobMeta, JobRequest};
