use super::{dir_prefix, ByteReader, Storage};
use crate::error::{EtlError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use tokio::io::AsyncWriteExt;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Storage rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in key.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }

    async fn ensure_parent(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Relative `/`-joined key for a path under the root
    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    async fn open_read(&self, key: &str) -> Result<ByteReader> {
        let file = tokio::fs::File::open(self.path(key)).await?;
        Ok(Box::new(file))
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.path(key)).await?)
    }

    /// Stages to `{key}.tmp` and renames into place, so readers never see
    /// a partially written file.
    async fn write(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let path = self.path(key);
        self.ensure_parent(&path).await?;

        let mut temp_name = path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(EtlError::Storage(format!("failed to move {} into place: {}", key, e)));
        }
        Ok(())
    }

    #[instrument(skip(self, local_path), fields(root = %self.root.display()))]
    async fn put_file(&self, key: &str, local_path: &Path) -> Result<u64> {
        let path = self.path(key);
        self.ensure_parent(&path).await?;
        let bytes = tokio::fs::copy(local_path, &path).await?;
        debug!(bytes, "Published {}", path.display());
        Ok(bytes)
    }

    async fn mkdir(&self, key: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.path(key)).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path(key)).await?)
    }

    async fn unlink(&self, key: &str, missing_ok: bool) -> Result<()> {
        match tokio::fs::remove_file(self.path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound && missing_ok => Ok(()),
            Err(e) => Err(EtlError::Storage(format!("failed to remove {}: {}", key, e))),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // walk from the deepest directory the prefix names, filter by the rest
        let start = match prefix.rfind('/') {
            Some(idx) => self.path(&prefix[..idx]),
            None => self.root.clone(),
        };

        let mut keys = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if let Some(key) = self.key_for(&path) {
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        let dir = dir_prefix(prefix);
        if dir.is_empty() {
            return Err(EtlError::Storage("refusing to remove the storage root".to_string()));
        }
        let removed = self.list(&dir).await?.len();
        match tokio::fs::remove_dir_all(self.path(&dir)).await {
            Ok(()) => Ok(removed),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(EtlError::Storage(format!("failed to remove {}: {}", dir, e))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_write_read_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        storage.write("a/b/one.txt", b"one".to_vec()).await.unwrap();
        storage.write("a/two.txt", b"two".to_vec()).await.unwrap();
        storage.write("c/three.txt", b"three".to_vec()).await.unwrap();

        assert_eq!(storage.read("a/b/one.txt").await.unwrap(), b"one");
        assert_eq!(
            storage.list("a/").await.unwrap(),
            vec!["a/b/one.txt".to_string(), "a/two.txt".to_string()]
        );
        assert_eq!(storage.list("").await.unwrap().len(), 3);
        assert!(storage.list("missing/").await.unwrap().is_empty());

        let mut reader = storage.open_read("c/three.txt").await.unwrap();
        let mut buf = String::new();
        reader.read_to_string(&mut buf).await.unwrap();
        assert_eq!(buf, "three");
    }

    #[tokio::test]
    async fn test_write_replaces_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        storage.write("p/_done.json", b"first".to_vec()).await.unwrap();
        storage.write("p/_done.json", b"second".to_vec()).await.unwrap();

        assert_eq!(storage.read("p/_done.json").await.unwrap(), b"second");
        assert_eq!(storage.list("p/").await.unwrap(), vec!["p/_done.json".to_string()]);
    }

    #[tokio::test]
    async fn test_unlink_missing_ok() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        assert!(storage.unlink("nope.txt", true).await.is_ok());
        assert!(matches!(
            storage.unlink("nope.txt", false).await,
            Err(EtlError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_prefix_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage.write("p/q/data_00000.parquet", vec![1]).await.unwrap();
        storage.write("p/q/_done.json", b"{}".to_vec()).await.unwrap();
        storage.write("p/keep.txt", vec![2]).await.unwrap();

        assert_eq!(storage.remove_prefix("p/q").await.unwrap(), 2);
        assert!(!storage.exists("p/q").await.unwrap());
        assert!(storage.exists("p/keep.txt").await.unwrap());
        assert_eq!(storage.remove_prefix("p/q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_put_file_and_glob() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().join("out"));
        let staged = dir.path().join("staged.bin");
        std::fs::write(&staged, b"payload").unwrap();

        let bytes = storage.put_file("x/y/data_00000.parquet", &staged).await.unwrap();
        assert_eq!(bytes, 7);
        storage.write("x/y/_done.json", b"{}".to_vec()).await.unwrap();

        let found = storage.glob("x/**/*.parquet").await.unwrap();
        assert_eq!(found, vec!["x/y/data_00000.parquet".to_string()]);
    }
}
