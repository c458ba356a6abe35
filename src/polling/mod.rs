//! The polling engine: a worker machine nested inside an orchestrator machine.
//!
//! - [`backoff`]: delay between status polls
//! - [`worker`]: polls one job until it resolves, fails, or is stopped
//! - [`orchestrator`]: instantiate → poll → fetch result, or cancel
//! - [`transitions`]: the pure routing rules both drivers follow
//! - [`message`]: reports, commands and lifecycle events passed between them

pub mod backoff;
pub mod message;
pub mod orchestrator;
pub mod transitions;
pub mod worker;


pub use backoff::{BackoffConfig, pause};
pub use message::{LifecycleEvent, LifecycleKind, OrchestratorCommand, WorkerReport};
pub use orchestrator::Orchestrator;
pub use transitions::{OrchestratorState, Terminal};
pub use worker::{PollingWorker, WorkerContext};
