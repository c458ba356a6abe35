//! Configuration for polling orchestration.
//!
//! Everything the core needs to know is passed in an [`OrchestratorConfig`] at
//! construction time. Nothing reads the process environment except
//! [`OrchestratorConfig::from_env`], which only the binary calls.
//!
//! # Defaults
//!
//! - **Backoff**: 200ms seed, 1.5x growth, 3s cap
//! - **Max tries**: 15 polls per job unless the request says otherwise
//! - **Stop timeout**: 30 seconds to wait for a worker to acknowledge STOP
//!   before it is aborted and the backend cancel proceeds anyway

use std::time::Duration;

use crate::polling::BackoffConfig;

/// Default ceiling on poll attempts for requests that do not carry one.
const DEFAULT_MAX_TRIES: u32 = 15;

/// Default bound on the STOP/acknowledge handshake during cancellation.
const DEFAULT_STOP_TIMEOUT_SECS: u64 = 30;

/// Default capacity of the per-job lifecycle event channel.
const DEFAULT_CHANNEL_BUFFER: usize = 32;

/// Prefix shared by every environment variable read by [`OrchestratorConfig::from_env`].
const ENV_PREFIX: &str = "JOB_ORCHESTRATOR_";

/// Configuration shared by every orchestrator a dispatcher starts.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Log every state transition at debug level.
    ///
    /// Default: false. Configure via `JOB_ORCHESTRATOR_DEBUG`.
    pub debug: bool,

    /// Delay factors between status polls.
    pub backoff: BackoffConfig,

    /// Poll ceiling used when a request has no `max_tries` of its own.
    ///
    /// Default: 15. Configure via `JOB_ORCHESTRATOR_MAX_TRIES`.
    pub max_tries: u32,

    /// How long a cancelling orchestrator waits for its worker to stop.
    ///
    /// `None` waits indefinitely. Default: 30 seconds.
    pub stop_timeout: Option<Duration>,

    /// Capacity of the lifecycle event channel between orchestrator and bridge.
    pub channel_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorConfig {
    /// Creates a new `OrchestratorConfig` with default values.
    pub fn new() -> Self {
        OrchestratorConfig {
            debug: false,
            backoff: BackoffConfig::DEFAULT,
            max_tries: DEFAULT_MAX_TRIES,
            stop_timeout: Some(Duration::from_secs(DEFAULT_STOP_TIMEOUT_SECS)),
            channel_buffer: DEFAULT_CHANNEL_BUFFER,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = max_tries;
        self
    }

    pub fn with_stop_timeout(mut self, stop_timeout: Option<Duration>) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    /// Creates an `OrchestratorConfig` from environment variables.
    ///
    /// Reads, all optional:
    /// - `JOB_ORCHESTRATOR_DEBUG` (`1`/`true`)
    /// - `JOB_ORCHESTRATOR_MAX_TRIES`
    /// - `JOB_ORCHESTRATOR_BACKOFF_SEED_MS`, `JOB_ORCHESTRATOR_BACKOFF_RATE`,
    ///   `JOB_ORCHESTRATOR_BACKOFF_MAX_MS`
    /// - `JOB_ORCHESTRATOR_STOP_TIMEOUT_SECS` (`0` disables the bound)
    ///
    /// Unparseable values fall back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable lookup.
    ///
    /// `lookup` receives full variable names such as `JOB_ORCHESTRATOR_MAX_TRIES`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |suffix: &str| lookup(&format!("{}{}", ENV_PREFIX, suffix));
        let defaults = Self::new();

        let debug = get("DEBUG")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.debug);

        let max_tries = get("MAX_TRIES")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(defaults.max_tries);

        let seed = get("BACKOFF_SEED_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.backoff.seed);

        let rate = get("BACKOFF_RATE")
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|r| r.is_finite() && *r >= 1.0)
            .unwrap_or(defaults.backoff.rate);

        let max = get("BACKOFF_MAX_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.backoff.max);

        let stop_timeout = match get("STOP_TIMEOUT_SECS").and_then(|v| v.trim().parse::<u64>().ok())
        {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.stop_timeout,
        };

        OrchestratorConfig {
            debug,
            backoff: BackoffConfig::new(seed, rate, max),
            max_tries,
            stop_timeout,
            ..defaults
        }
    }
}
