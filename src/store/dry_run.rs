use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::info;

use super::{FileLookup, FileStore, StateStore};
use crate::error::{StoreError, VaultShiftError};
use crate::state::PersistedState;

/// Wraps a file store so that nothing is ever modified. Reads, listings and
/// existence checks go to the inner store; writes and renames are logged and
/// counted.
pub struct DryRunFileStore {
    inner: Arc<dyn FileStore>,
    writes: AtomicUsize,
    renames: AtomicUsize,
}

impl DryRunFileStore {
    pub fn new(inner: Arc<dyn FileStore>) -> Self {
        Self {
            inner,
            writes: AtomicUsize::new(0),
            renames: AtomicUsize::new(0),
        }
    }

    pub fn skipped_writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn skipped_renames(&self) -> usize {
        self.renames.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileStore for DryRunFileStore {
    async fn read(&self, path: &str) -> FileLookup<String> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &str, _content: &str) -> Result<(), StoreError> {
        info!("[dry run] UPDATE: {}", path);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.list(prefix).await
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<(), StoreError> {
        info!("[dry run] RENAME: {} → {}", old_path, new_path);
        self.renames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        self.inner.exists(path).await
    }
}

/// Loads from the inner store until the first save; saves are kept in memory.
pub struct DryRunStateStore {
    inner: Arc<dyn StateStore>,
    staged: Mutex<Option<PersistedState>>,
}

impl DryRunStateStore {
    pub fn new(inner: Arc<dyn StateStore>) -> Self {
        Self {
            inner,
            staged: Mutex::new(None),
        }
    }

    pub fn staged(&self) -> Option<PersistedState> {
        self.staged.lock().unwrap().clone()
    }
}

#[async_trait]
impl StateStore for DryRunStateStore {
    async fn load(&self) -> Result<PersistedState, VaultShiftError> {
        let staged = self.staged.lock().unwrap().clone();
        match staged {
            Some(state) => Ok(state),
            None => self.inner.load().await,
        }
    }

    async fn save(&self, state: &PersistedState) -> Result<(), VaultShiftError> {
        // Round-trip through JSON so a dry run exercises the same serialization
        let reparsed = PersistedState::from_json(&state.to_json()?)?;
        *self.staged.lock().unwrap() = Some(reparsed);
        Ok(())
    }
}
