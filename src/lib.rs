//! Job Orchestrator - resumable polling orchestration for long-running backend jobs.
//!
//! A job is instantiated on a backend, polled with exponential backoff until it
//! resolves, and its result fetched. Each job runs as its own task and reports
//! lifecycle events over a channel; the dispatcher relays those events to the
//! application and persists the jobs still in flight so they can be resumed
//! after a restart.

pub mod backend;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod mapping;
pub mod persistence;
pub mod polling;
pub mod types;

#[cfg(test)]
mod test_utils;
