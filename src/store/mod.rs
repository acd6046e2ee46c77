//! Access to vault content and to the persisted state blob.
//!
//! Paths handed to a [`FileStore`] are vault-relative and `/`-separated.

pub mod dry_run;
pub mod json_state;
pub mod memory;
pub mod vault;

use async_trait::async_trait;

use crate::error::{StoreError, VaultShiftError};
use crate::state::PersistedState;

pub use dry_run::{DryRunFileStore, DryRunStateStore};
pub use json_state::JsonStateStore;
pub use memory::{MemoryFileStore, MemoryStateStore};
pub use vault::VaultFileStore;

/// Outcome of looking something up in a store.
#[derive(Debug)]
pub enum FileLookup<T> {
    Found(T),
    NotFound,
    Error(StoreError),
}

impl<T> FileLookup<T> {
    pub fn from_result(path: &str, result: Result<T, std::io::Error>) -> Self {
        match result {
            Ok(value) => FileLookup::Found(value),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileLookup::NotFound,
            Err(e) => FileLookup::Error(StoreError::io(path, e)),
        }
    }

    /// Collapse into a `Result`, treating absence as `None`.
    pub fn into_result(self) -> Result<Option<T>, StoreError> {
        match self {
            FileLookup::Found(value) => Ok(Some(value)),
            FileLookup::NotFound => Ok(None),
            FileLookup::Error(e) => Err(e),
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, FileLookup::Found(_))
    }
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn read(&self, path: &str) -> FileLookup<String>;

    async fn write(&self, path: &str, content: &str) -> Result<(), StoreError>;

    /// Every file below `prefix`, recursively, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Rename a file or a folder. Missing parent folders of `new_path` are created.
    async fn rename(&self, old_path: &str, new_path: &str) -> Result<(), StoreError>;

    async fn exists(&self, path: &str) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the state blob. A blob that was never written loads as the empty
    /// default state.
    async fn load(&self) -> Result<PersistedState, VaultShiftError>;

    /// Replace the stored blob with `state`.
    async fn save(&self, state: &PersistedState) -> Result<(), VaultShiftError>;
}

/// Join two vault-relative path fragments.
pub fn join_path(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if base.is_empty() {
        name.to_owned()
    } else if name.is_empty() {
        base.to_owned()
    } else {
        format!("{}/{}", base, name)
    }
}

/// Final component of a vault-relative path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// The path of `path` relative to `prefix`, when it lies below it.
pub fn strip_folder<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return Some(path);
    }
    path.strip_prefix(prefix)?.strip_prefix('/')
}
