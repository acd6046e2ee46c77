use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{FileLookup, FileStore, StateStore};
use crate::error::{StoreError, VaultShiftError};
use crate::state::PersistedState;

/// File store backed by an in-memory map. Counts write calls so callers can
/// assert that unchanged content is never written back.
#[derive(Default)]
pub struct MemoryFileStore {
    files: Mutex<BTreeMap<String, String>>,
    failing: Mutex<HashSet<String>>,
    writes: AtomicUsize,
    renames: AtomicUsize,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        let store = Self::new();
        {
            let mut map = store.files.lock().unwrap();
            for (path, content) in files {
                map.insert(path.into(), content.into());
            }
        }
        store
    }

    /// Make every read and write of `path` fail with an I/O error.
    pub fn fail_on(&self, path: &str) {
        self.failing.lock().unwrap().insert(path.to_owned());
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.lock().unwrap().keys().cloned().collect()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn rename_count(&self) -> usize {
        self.renames.load(Ordering::SeqCst)
    }

    fn check_failing(&self, path: &str) -> Result<(), StoreError> {
        if self.failing.lock().unwrap().contains(path) {
            return Err(StoreError::Io {
                path: path.to_owned(),
                source: std::io::Error::other("injected failure"),
            });
        }
        Ok(())
    }
}

fn folder_prefix(path: &str) -> String {
    format!("{}/", path.trim_end_matches('/'))
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn read(&self, path: &str) -> FileLookup<String> {
        if let Err(e) = self.check_failing(path) {
            return FileLookup::Error(e);
        }
        match self.files.lock().unwrap().get(path) {
            Some(content) => FileLookup::Found(content.clone()),
            None => FileLookup::NotFound,
        }
    }

    async fn write(&self, path: &str, content: &str) -> Result<(), StoreError> {
        self.check_failing(path)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.files
            .lock()
            .unwrap()
            .insert(path.to_owned(), content.to_owned());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let files = self.files.lock().unwrap();
        if prefix.trim_matches('/').is_empty() {
            return Ok(files.keys().cloned().collect());
        }
        let folder = folder_prefix(prefix);
        Ok(files
            .keys()
            .filter(|path| path.starts_with(&folder))
            .cloned()
            .collect())
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<(), StoreError> {
        let mut files = self.files.lock().unwrap();
        let new_folder = folder_prefix(new_path);
        if files.contains_key(new_path) || files.keys().any(|p| p.starts_with(&new_folder)) {
            return Err(StoreError::Other(format!("'{}' already exists", new_path)));
        }

        if let Some(content) = files.remove(old_path) {
            files.insert(new_path.to_owned(), content);
            self.renames.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }

        let old_folder = folder_prefix(old_path);
        let moved: Vec<String> = files
            .keys()
            .filter(|p| p.starts_with(&old_folder))
            .cloned()
            .collect();
        if moved.is_empty() {
            return Err(StoreError::NotFound(old_path.to_owned()));
        }
        for path in moved {
            if let Some(content) = files.remove(&path) {
                let relocated = format!("{}{}", new_folder, &path[old_folder.len()..]);
                files.insert(relocated, content);
            }
        }
        self.renames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        let files = self.files.lock().unwrap();
        let folder = folder_prefix(path);
        Ok(files.contains_key(path) || files.keys().any(|p| p.starts_with(&folder)))
    }
}

/// State store that keeps the serialized blob in memory, so every save/load
/// cycle goes through the same serialization as the on-disk store.
#[derive(Default)]
pub struct MemoryStateStore {
    raw: Mutex<Option<String>>,
    saves: AtomicUsize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_json(json: impl Into<String>) -> Self {
        Self {
            raw: Mutex::new(Some(json.into())),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn raw(&self) -> Option<String> {
        self.raw.lock().unwrap().clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<PersistedState, VaultShiftError> {
        match self.raw.lock().unwrap().as_deref() {
            Some(json) => Ok(PersistedState::from_json(json)?),
            None => Ok(PersistedState::default()),
        }
    }

    async fn save(&self, state: &PersistedState) -> Result<(), VaultShiftError> {
        let json = state.to_json()?;
        *self.raw.lock().unwrap() = Some(json);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
