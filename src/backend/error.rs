//! Backend error type.
//!
//! Backend failures are never retried by the orchestration core: any error
//! from `instantiate`, `poll_status`, `fetch_result` or `cancel` ends the job
//! in the failed state. The status code is kept for logging and for callers
//! that want to tell user errors from server errors when showing a notice.

use std::fmt;
use thiserror::Error;

/// The backend operation that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Instantiate,
    PollStatus,
    FetchResult,
    Cancel,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Instantiate => "instantiate",
            Operation::PollStatus => "poll status",
            Operation::FetchResult => "fetch result",
            Operation::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

/// An error returned by a [`JobBackend`](super::JobBackend) operation.
#[derive(Debug, Clone, Error)]
pub struct BackendError {
    /// The HTTP status code (or equivalent), if the transport reported one.
    pub status_code: Option<u16>,

    /// A human-readable description of the error.
    pub message: String,
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "backend error (HTTP {}): {}", code, self.message),
            None => write!(f, "backend error: {}", self.message),
        }
    }
}

impl BackendError {
    /// Creates an error without a status code (network failure, decode error, ...).
    pub fn new(message: impl Into<String>) -> Self {
        BackendError {
            status_code: None,
            message: message.into(),
        }
    }

    /// Creates an error carrying the transport's status code.
    pub fn with_status(status_code: u16, message: impl Into<String>) -> Self {
        BackendError {
            status_code: Some(status_code),
            message: message.into(),
        }
    }

    /// Returns true for 4xx status codes.
    pub fn is_client_error(&self) -> bool {
        matches!(self.status_code, Some(code) if (400..500).contains(&code))
    }

    /// Describes this error as the outcome of `operation`, for job failure reasons.
    pub fn describe(&self, operation: Operation) -> String {
        format!("{} failed: {}", operation, self)
    }
}
