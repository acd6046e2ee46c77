use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::debug;
use tempfile::NamedTempFile;

use super::StateStore;
use crate::error::VaultShiftError;
use crate::state::PersistedState;

/// State blob stored as a pretty-printed JSON file.
///
/// Saves go to a temporary file in the same folder which then replaces the
/// target, so a crash mid-save leaves the previous blob intact.
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_atomically(path: &Path, contents: &str) -> Result<(), VaultShiftError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| VaultShiftError::IoError(e.error))?;
    Ok(())
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn load(&self) -> Result<PersistedState, VaultShiftError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(json) => Ok(PersistedState::from_json(&json)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state at {}, starting empty", self.path.display());
                Ok(PersistedState::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, state: &PersistedState) -> Result<(), VaultShiftError> {
        let json = state.to_json()?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &json))
            .await
            .map_err(|e| VaultShiftError::Error(format!("State save task failed: {}", e)))?
    }
}
