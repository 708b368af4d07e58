//! Filesystem-backed [`ContentStore`].
//!
//! Each key maps to one file under the base directory. Keys are relative
//! `/`-separated paths; empty segments, `.` and `..` are rejected.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use casefile_core::{ContentStore, Error, Result};

pub struct FilesystemContentStore {
    base_path: PathBuf,
}

impl FilesystemContentStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .split('/')
                .all(|seg| !seg.is_empty() && seg != "." && seg != ".." && !seg.contains('\\'));
        if !valid {
            return Err(Error::InvalidInput(format!("invalid content key '{}'", key)));
        }
        Ok(self.base_path.join(key))
    }
}

#[async_trait]
impl ContentStore for FilesystemContentStore {
    async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(key)?;
        debug!(
            subsystem = "storage",
            component = "content_store",
            op = "write",
            key,
            size = data.len(),
            "Writing content"
        );

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "content_store: create_dir_all failed");
                e
            })?;
        }

        // temp file + rename keeps readers from seeing partial content
        let temp_path = full_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &full_path).await.map_err(|e| {
            warn!(from = %temp_path.display(), to = %full_path.display(), error = %e, "content_store: rename failed");
            e
        })?;
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(key)?;
        match fs::read(&full_path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("no such key: {}", key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_path = self.full_path(key)?;
        match fs::remove_file(&full_path).await {
            Ok(()) => {
                debug!(
                    subsystem = "storage",
                    component = "content_store",
                    op = "delete",
                    key,
                    "Deleted content"
                );
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("no such key: {}", key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let full_path = self.full_path(key)?;
        Ok(fs::try_exists(full_path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_read_exists_delete() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemContentStore::new(dir.path());

        store.write("ab/cd/full.png", b"image").await.unwrap();
        assert!(store.exists("ab/cd/full.png").await.unwrap());
        assert_eq!(store.read("ab/cd/full.png").await.unwrap(), b"image");

        store.delete("ab/cd/full.png").await.unwrap();
        assert!(!store.exists("ab/cd/full.png").await.unwrap());
    }

    #[tokio::test]
    async fn test_write_replaces_content() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemContentStore::new(dir.path());

        store.write("k", b"one").await.unwrap();
        store.write("k", b"two").await.unwrap();
        assert_eq!(store.read("k").await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemContentStore::new(dir.path());

        assert!(matches!(store.delete("gone").await, Err(Error::NotFound(_))));
        assert!(matches!(store.read("gone").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemContentStore::new(dir.path());

        for key in ["", "../x", "a/../../x", "/etc/passwd", "a//b", "a\\b"] {
            assert!(
                matches!(store.write(key, b"x").await, Err(Error::InvalidInput(_))),
                "{key:?}"
            );
        }
    }
}
