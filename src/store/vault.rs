use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::trace;
use tokio::fs;

use super::{FileLookup, FileStore};
use crate::error::StoreError;

/// File store over a vault directory on disk.
///
/// Hidden entries (names starting with `.`) are never listed; that keeps the
/// host's own configuration folders and our state folder out of migrations.
pub struct VaultFileStore {
    root: PathBuf,
}

impl VaultFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let mut full = self.root.clone();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            full.push(part);
        }
        full
    }

    fn relative(&self, full: &Path) -> Option<String> {
        let rel = full.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

#[async_trait]
impl FileStore for VaultFileStore {
    async fn read(&self, path: &str) -> FileLookup<String> {
        FileLookup::from_result(path, fs::read_to_string(self.resolve(path)).await)
    }

    async fn write(&self, path: &str, content: &str) -> Result<(), StoreError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(path, e))?;
        }
        trace!("Writing {}", path);
        fs::write(&full, content)
            .await
            .map_err(|e| StoreError::io(path, e))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let start = self.resolve(prefix);
        if !fs::try_exists(&start)
            .await
            .map_err(|e| StoreError::io(prefix, e))?
        {
            return Ok(Vec::new());
        }

        let mut pending = vec![start];
        let mut files = Vec::new();
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| StoreError::io(dir.to_string_lossy(), e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StoreError::io(dir.to_string_lossy(), e))?
            {
                if entry.file_name().to_string_lossy().starts_with('.') {
                    continue;
                }
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| StoreError::io(entry.path().to_string_lossy(), e))?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    if let Some(rel) = self.relative(&entry.path()) {
                        files.push(rel);
                    }
                }
            }
        }

        files.sort();
        Ok(files)
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<(), StoreError> {
        let from = self.resolve(old_path);
        let to = self.resolve(new_path);

        if fs::try_exists(&to)
            .await
            .map_err(|e| StoreError::io(new_path, e))?
        {
            return Err(StoreError::Other(format!("'{}' already exists", new_path)));
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(new_path, e))?;
        }
        fs::rename(&from, &to)
            .await
            .map_err(|e| StoreError::io(old_path, e))
    }

    async fn exists(&self, path: &str) -> Result<bool, StoreError> {
        fs::try_exists(self.resolve(path))
            .await
            .map_err(|e| StoreError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_vault_store_lifecycle() {
        let dir = TempDir::new().unwrap();
        let store = VaultFileStore::new(dir.path());

        store.write("AI/Conversations/claude/a.md", "hello").await.unwrap();
        store.write("AI/Conversations/claude/sub/b.md", "world").await.unwrap();
        store.write(".hidden/c.md", "skip").await.unwrap();

        assert_eq!(
            store.list("AI").await.unwrap(),
            vec!["AI/Conversations/claude/a.md", "AI/Conversations/claude/sub/b.md"]
        );
        assert!(!store.list("").await.unwrap().iter().any(|p| p.contains("hidden")));
        assert!(store.list("Nope").await.unwrap().is_empty());

        match store.read("AI/Conversations/claude/a.md").await {
            FileLookup::Found(text) => assert_eq!(text, "hello"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(store.read("missing.md").await, FileLookup::NotFound));

        store
            .rename("AI/Conversations/claude/sub", "AI/Renamed/sub")
            .await
            .unwrap();
        assert!(store.exists("AI/Renamed/sub/b.md").await.unwrap());
        assert!(!store.exists("AI/Conversations/claude/sub").await.unwrap());

        let err = store
            .rename("AI/Conversations/claude/a.md", "AI/Renamed/sub/b.md")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Other(_)));
    }
}
