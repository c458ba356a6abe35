//! The persisted form of the pending-request map.
//!
//! One document, stored under [`PENDING_REQUESTS_KEY`]:
//!
//! ```json
//! {
//!   "schema_version": 1,
//!   "saved_at": "2024-05-01T12:00:00Z",
//!   "pending_requests": {
//!     "ETL": { "sales": { "event": { "meta": ..., "request": ... }, "feature": "ETL" } }
//!   }
//! }
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::store::{StateStore, StoreError};
use crate::types::{Feature, JobEvent, UiKey};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Store key of the pending-request document.
pub const PENDING_REQUESTS_KEY: &str = "pending_requests";

/// Errors that can occur while loading or saving a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Schema version mismatch.
    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },
}

/// Result type for snapshot operations.
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// The last known state of one in-flight job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRecord {
    pub event: JobEvent,
    pub feature: Feature,
}

impl PendingRecord {
    pub fn new(event: JobEvent) -> Self {
        let feature = event.meta.feature.clone();
        PendingRecord { event, feature }
    }
}

/// Pending records keyed by feature, then by request key.
pub type PendingMap = BTreeMap<Feature, BTreeMap<UiKey, PendingRecord>>;

/// Every job that was dispatched but has not reached a terminal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSnapshot {
    /// Schema version for forward-compatible migrations.
    pub schema_version: u32,

    /// When this snapshot was taken.
    pub saved_at: DateTime<Utc>,

    pub pending_requests: PendingMap,
}

impl Default for PendingSnapshot {
    fn default() -> Self {
        Self::new(PendingMap::new())
    }
}

impl PendingSnapshot {
    pub fn new(pending_requests: PendingMap) -> Self {
        PendingSnapshot {
            schema_version: SCHEMA_VERSION,
            saved_at: Utc::now(),
            pending_requests,
        }
    }

    /// Number of pending records across all features.
    pub fn len(&self) -> usize {
        self.pending_requests.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over every pending record, ordered by feature then key.
    pub fn records(&self) -> impl Iterator<Item = &PendingRecord> {
        self.pending_requests.values().flat_map(BTreeMap::values)
    }

    /// Parses a stored document, rejecting other schema versions.
    pub fn from_value(value: Value) -> Result<Self> {
        let snapshot: PendingSnapshot = serde_json::from_value(value)?;
        if snapshot.schema_version != SCHEMA_VERSION {
            return Err(SnapshotError::SchemaMismatch {
                expected: SCHEMA_VERSION,
                got: snapshot.schema_version,
            });
        }
        Ok(snapshot)
    }

    /// Loads the snapshot from `store`, or an empty one if none was saved.
    pub async fn load_from<S: StateStore>(store: &S) -> Result<Self> {
        match store.load(PENDING_REQUESTS_KEY).await? {
            Some(value) => Self::from_value(value),
            None => Ok(Self::default()),
        }
    }

    /// Saves the snapshot to `store`.
    pub async fn save_to<S: StateStore>(&self, store: &S) -> Result<()> {
        let value = serde_json::to_value(self)?;
        store.save(PENDING_REQUESTS_KEY, value).await?;
        Ok(())
    }
}
