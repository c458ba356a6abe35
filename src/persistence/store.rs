//! The key-value store the dispatcher persists pending requests into.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use thiserror::Error;

/// Errors from a [`StateStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Keys may only contain ASCII letters, digits, `_` and `-`.
    #[error("invalid store key: {0:?}")]
    InvalidKey(String),

    /// A blocking IO task panicked or was cancelled.
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// An opaque async key-value store of JSON documents.
pub trait StateStore: Send + Sync + 'static {
    /// Returns the document under `key`, or `None` if there is none.
    fn load(&self, key: &str) -> impl Future<Output = Result<Option<Value>>> + Send;

    /// Replaces the document under `key`.
    fn save(&self, key: &str, value: Value) -> impl Future<Output = Result<()>> + Send;

    /// Deletes the document under `key`. Deleting a missing key succeeds.
    fn remove(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Rejects keys that could escape a directory or collide after escaping.
pub fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

/// A store that keeps documents in memory. Used in tests and when no state
/// directory is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StateStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<Value>> {
        validate_key(key)?;
        Ok(self.entries().get(key).cloned())
    }

    async fn save(&self, key: &str, value: Value) -> Result<()> {
        validate_key(key)?;
        self.entries().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.entries().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_restricted() {
        assert!(validate_key("pending_requests").is_ok());
        assert!(validate_key("a-b_9").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("../etc").is_err());
        assert!(validate_key("a/b").is_err());
    }

    #[tokio::test]
    async fn memory_store_round_trip_and_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.load("k").await.unwrap(), None);

        store.save("k", json!({ "a": 1 })).await.unwrap();
        assert_eq!(store.load("k").await.unwrap(), Some(json!({ "a": 1 })));

        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert_eq!(store.load("k").await.unwrap(), None);
    }
}
