//! Persistence for pending requests.
//!
//! The dispatcher keeps a record of every in-flight job so the jobs can be
//! resumed after a restart. This module provides:
//! - **[`StateStore`]**: the async key-value contract the dispatcher writes through
//! - **[`MemoryStore`]** and **[`FileStore`]**: in-memory and crash-safe file implementations
//! - **[`PendingSnapshot`]**: the versioned document holding every pending record
//!
//! # Recovery
//!
//! On startup the binary loads the snapshot under `pending_requests` and hands
//! it to `JobDispatcher::rehydrate`, which re-issues a FETCH per record.

pub mod file;
pub mod snapshot;
pub mod store;

pub use file::FileStore;
pub use snapshot::{
    PENDING_REQUESTS_KEY, PendingMap, PendingRecord, PendingSnapshot, SCHEMA_VERSION,
    SnapshotError,
};
pub use store::{MemoryStore, StateStore, StoreError};
