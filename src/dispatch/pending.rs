//! Tracks in-flight jobs so they can be resumed after a restart.
//!
//! The map is only ever changed through three document operations, derived
//! from the actions passing through the dispatcher:
//!
//! | Action                                    | Change   |
//! |-------------------------------------------|----------|
//! | FETCH, RESUME                             | `Add`    |
//! | POLLING_START, POLLING_END                | `Update` |
//! | CANCEL, POLLING_RESOLVED/ERROR/CANCELLED  | `Remove` |
//!
//! `Update` never re-creates a removed record, so a late POLLING_END from a
//! cancelled job cannot resurrect it. Every change is published as a
//! [`PendingSnapshot`] on a watch channel for the persister.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::trace;

use super::action::{Action, ActionKind};
use crate::persistence::{PendingMap, PendingRecord, PendingSnapshot};
use crate::types::{Feature, JobEvent, UiKey};

/// A document operation on the pending-request map.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingChange {
    /// Insert or replace the record for the event's job.
    Add(JobEvent),
    /// Replace the record if it still exists.
    Update(JobEvent),
    Remove { feature: Feature, key: UiKey },
}

/// Derives the pending-map change an action implies, if any.
///
/// Invalid commands imply no change.
pub fn pending_change(action: &Action) -> Option<PendingChange> {
    match &action.kind {
        ActionKind::Fetch(command) => command
            .validate(&action.feature, false)
            .ok()
            .map(PendingChange::Add),
        ActionKind::Resume(command) => command
            .validate(&action.feature, true)
            .ok()
            .map(PendingChange::Add),
        ActionKind::Cancel(meta) => meta.validate_cancel(&action.feature).ok().map(|meta| {
            PendingChange::Remove {
                feature: meta.feature,
                key: meta.ui_key,
            }
        }),
        ActionKind::PollingStart(event) | ActionKind::PollingEnd(event) => {
            Some(PendingChange::Update(event.clone()))
        }
        ActionKind::PollingResolved(event)
        | ActionKind::PollingError(event)
        | ActionKind::PollingCancelled(event) => Some(PendingChange::Remove {
            feature: event.meta.feature.clone(),
            key: event.meta.ui_key.clone(),
        }),
        ActionKind::ActionError(_) | ActionKind::Notice(_) => None,
    }
}

/// The shared pending-request map.
#[derive(Debug)]
pub struct PendingTracker {
    records: Mutex<PendingMap>,
    published: watch::Sender<PendingSnapshot>,
}

impl Default for PendingTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTracker {
    pub fn new() -> Self {
        Self::from_snapshot(PendingSnapshot::default())
    }

    /// Starts from previously persisted records.
    pub fn from_snapshot(snapshot: PendingSnapshot) -> Self {
        let records = snapshot.pending_requests.clone();
        let (published, _) = watch::channel(snapshot);
        PendingTracker {
            records: Mutex::new(records),
            published,
        }
    }

    fn records(&self) -> MutexGuard<'_, PendingMap> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies the change implied by `action`. Returns true if the map changed.
    pub fn observe(&self, action: &Action) -> bool {
        match pending_change(action) {
            Some(change) => self.apply(change),
            None => false,
        }
    }

    /// Applies one document operation. Returns true if the map changed.
    pub fn apply(&self, change: PendingChange) -> bool {
        let mut records = self.records();

        let changed = match change {
            PendingChange::Add(event) => {
                let record = PendingRecord::new(event);
                let key = record.event.meta.ui_key.clone();
                let slot = records.entry(record.feature.clone()).or_default();
                slot.insert(key, record);
                true
            }
            PendingChange::Update(event) => {
                match records
                    .get_mut(&event.meta.feature)
                    .and_then(|slot| slot.get_mut(&event.meta.ui_key))
                {
                    Some(record) => {
                        record.event = event;
                        true
                    }
                    None => false,
                }
            }
            PendingChange::Remove { feature, key } => {
                let removed = records
                    .get_mut(&feature)
                    .is_some_and(|slot| slot.remove(&key).is_some());
                if records.get(&feature).is_some_and(BTreeMap::is_empty) {
                    records.remove(&feature);
                }
                removed
            }
        };

        if changed {
            let pending: usize = records.values().map(BTreeMap::len).sum();
            trace!(pending, "Pending requests changed");
            // Published under the lock so snapshots are never reordered.
            self.published.send_replace(PendingSnapshot::new(records.clone()));
        }
        changed
    }

    /// Returns the current record for a job, if it is pending.
    pub fn get(&self, feature: &Feature, key: &UiKey) -> Option<PendingRecord> {
        self.records()
            .get(feature)
            .and_then(|slot| slot.get(key))
            .cloned()
    }

    pub fn contains(&self, feature: &Feature, key: &UiKey) -> bool {
        self.get(feature, key).is_some()
    }

    /// Takes a snapshot of every pending record.
    pub fn snapshot(&self) -> PendingSnapshot {
        PendingSnapshot::new(self.records().clone())
    }

    /// Subscribes to published snapshots.
    pub fn subscribe(&self) -> watch::Receiver<PendingSnapshot> {
        self.published.subscribe()
    }
}
