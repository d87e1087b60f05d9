//! Durable key/value stores backing the warm cache tier

use crate::error::Result;
use crate::key;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::OnceCell;
use tracing::debug;

/// Key/value persistence that survives process restarts.
///
/// `read` returns `Ok(None)` for a key that was never written; any other
/// failure is an error the caller decides how to treat.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Create the backing container. Idempotent.
    async fn ensure_container(&self) -> Result<()>;

    async fn write(&self, key: &str, blob: &str) -> Result<()>;

    async fn read(&self, key: &str) -> Result<Option<String>>;

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Storage identifiers of every stored entry
    async fn list_entries(&self) -> Result<Vec<String>>;

    /// Read a blob by the identifier returned from `list_entries`
    async fn read_entry(&self, entry: &str) -> Result<Option<String>>;

    /// Remove a blob by the identifier returned from `list_entries`
    async fn delete_entry(&self, entry: &str) -> Result<()>;

    /// Remove everything
    async fn clear(&self) -> Result<()>;
}

/// Directory of JSON files, one file per key named `<sha256(key)>.json`
pub struct FsStore {
    dir: PathBuf,
    created: OnceCell<()>,
}

impl FsStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            created: OnceCell::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key::file_stem(key)))
    }

    fn entry_path(&self, entry: &str) -> PathBuf {
        self.dir.join(format!("{}.json", entry))
    }
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn read_if_present(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl DurableStore for FsStore {
    async fn ensure_container(&self) -> Result<()> {
        self.created
            .get_or_try_init(|| async {
                fs::create_dir_all(&self.dir).await?;
                debug!("Cache directory ready: {:?}", self.dir);
                Ok::<(), crate::error::MemoryError>(())
            })
            .await?;
        Ok(())
    }

    async fn write(&self, key: &str, blob: &str) -> Result<()> {
        self.ensure_container().await?;
        let path = self.path_for(key);
        match fs::write(&path, blob).await {
            Ok(()) => Ok(()),
            // directory removed underneath us
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(&self.dir).await?;
                fs::write(&path, blob).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, key: &str) -> Result<Option<String>> {
        read_if_present(&self.path_for(key)).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        remove_if_present(&self.path_for(key)).await
    }

    async fn list_entries(&self) -> Result<Vec<String>> {
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                entries.push(stem.to_string());
            }
        }
        Ok(entries)
    }

    async fn read_entry(&self, entry: &str) -> Result<Option<String>> {
        read_if_present(&self.entry_path(entry)).await
    }

    async fn delete_entry(&self, entry: &str) -> Result<()> {
        remove_if_present(&self.entry_path(entry)).await
    }

    async fn clear(&self) -> Result<()> {
        for entry in self.list_entries().await? {
            self.delete_entry(&entry).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_container_created_lazily() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("agentA");
        let store = FsStore::new(&dir);

        assert!(!dir.exists());
        store.ensure_container().await.unwrap();
        store.ensure_container().await.unwrap();
        assert!(dir.exists());
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path().join("scope"));

        assert_eq!(store.read("missing").await.unwrap(), None);

        store.write("k/with/slashes", "{\"value\":1,\"expiry\":null}").await.unwrap();
        assert!(store.path_for("k/with/slashes").exists());
        assert_eq!(
            store.read("k/with/slashes").await.unwrap().as_deref(),
            Some("{\"value\":1,\"expiry\":null}")
        );

        store.delete("k/with/slashes").await.unwrap();
        store.delete("k/with/slashes").await.unwrap();
        assert_eq!(store.read("k/with/slashes").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_and_clear() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path().join("scope"));
        assert!(store.list_entries().await.unwrap().is_empty());

        store.write("a", "1").await.unwrap();
        store.write("b", "2").await.unwrap();
        std::fs::write(tmp.path().join("scope").join("notes.txt"), "ignored").unwrap();

        let entries = store.list_entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.contains(&key::file_stem("a")));

        store.clear().await.unwrap();
        assert!(store.list_entries().await.unwrap().is_empty());
    }
}
