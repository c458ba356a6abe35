//! A [`StateStore`] keeping one JSON file per key.
//!
//! # File Layout
//!
//! ```text
//! <state_dir>/
//!   <key>.json        # current document
//!   <key>.json.tmp    # only present if a write was interrupted
//! ```
//!
//! # Atomic Writes
//!
//! Documents are written with write-to-temp-then-rename:
//! 1. Write to `<key>.json.tmp`
//! 2. fsync the file
//! 3. Rename to `<key>.json`
//! 4. fsync the directory
//!
//! Readers see either the old or the new document, never a partial write.
//! Directory fsyncs matter: without them a rename may not survive power loss
//! even if the file contents were synced.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use super::store::{Result, StateStore, validate_key};

/// A file-backed store rooted at one directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl StateStore for FileStore {
    async fn load(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key)?;
        tokio::task::spawn_blocking(move || read_document(&path)).await?
    }

    async fn save(&self, key: &str, value: Value) -> Result<()> {
        let path = self.path_for(key)?;
        debug!(path = %path.display(), "Saving document");
        tokio::task::spawn_blocking(move || write_document_atomic(&path, &value)).await?
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        tokio::task::spawn_blocking(move || remove_document(&path)).await?
    }
}

fn read_document(path: &Path) -> Result<Option<Value>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_document_atomic(path: &Path, value: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(value)?;

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }

    std::fs::rename(&tmp_path, path)?;

    if let Some(parent) = path.parent() {
        fsync_dir(parent)?;
    }
    Ok(())
}

fn remove_document(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    }
    if let Some(parent) = path.parent() {
        fsync_dir(parent)?;
    }
    Ok(())
}

/// Syncs a directory so that created, renamed and deleted entries are durable.
fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}
