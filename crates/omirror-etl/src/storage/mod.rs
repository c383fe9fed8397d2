//! Output storage abstraction
//!
//! Keys are `/`-separated paths relative to the destination root
//! (`sra/study/date=2025-01-01/stage=Full/data_00000.parquet`). The same
//! key works against a local directory and an `s3://bucket/prefix`
//! destination.

use crate::error::{EtlError, Result};
use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncRead;

pub mod config;
pub mod local;
pub mod s3;

pub use config::StorageConfig;
pub use local::LocalStorage;
pub use s3::S3Storage;

/// Boxed async byte reader returned by [`Storage::open_read`]
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Human readable root (`/data/mirror`, `s3://bucket/prefix`)
    fn describe(&self) -> String;

    async fn open_read(&self, key: &str) -> Result<ByteReader>;

    async fn read(&self, key: &str) -> Result<Vec<u8>>;

    async fn write(&self, key: &str, data: Vec<u8>) -> Result<()>;

    /// Publish a local file byte-for-byte under `key`, returning its size
    async fn put_file(&self, key: &str, local_path: &Path) -> Result<u64>;

    /// Create a directory and its parents; a no-op on object stores
    async fn mkdir(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn unlink(&self, key: &str, missing_ok: bool) -> Result<()>;

    /// All keys under `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Keys matching a glob pattern (`*`, `?`, `**`), sorted
    async fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = Pattern::new(pattern)
            .map_err(|e| EtlError::Storage(format!("invalid glob {}: {}", pattern, e)))?;
        let keys = self.list(literal_prefix(pattern)).await?;
        Ok(keys
            .into_iter()
            .filter(|k| matcher.matches_with(k, KEY_MATCH))
            .collect())
    }

    /// Recursively delete everything under `prefix`; returns the number of
    /// keys removed. A missing prefix removes nothing.
    async fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        let dir = dir_prefix(prefix);
        let keys = self.list(&dir).await?;
        for key in &keys {
            self.unlink(key, true).await?;
        }
        Ok(keys.len())
    }
}

/// Open the backend selected by a destination string: `s3://bucket/prefix`
/// uses S3, anything else is a local directory.
pub async fn open(dest: &str, config: &StorageConfig) -> Result<Arc<dyn Storage>> {
    if let Some(rest) = dest.strip_prefix("s3://") {
        let (bucket, prefix) = match rest.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix.trim_matches('/')),
            None => (rest, ""),
        };
        if bucket.is_empty() {
            return Err(EtlError::Config(format!("missing bucket in destination {}", dest)));
        }
        let storage = S3Storage::new(config, bucket, prefix).await?;
        Ok(Arc::new(storage))
    } else {
        Ok(Arc::new(LocalStorage::new(dest)))
    }
}

/// Join key segments with `/`, ignoring empty segments
pub fn join_key<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .map(|p| p.as_ref().trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Normalize a directory key so it only matches whole path segments
pub(crate) fn dir_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// Wildcards never cross `/`; only `**` spans segments
const KEY_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Portion of a glob before its first wildcard
fn literal_prefix(pattern: &str) -> &str {
    match pattern.find(['*', '?', '[']) {
        Some(idx) => &pattern[..idx],
        None => pattern,
    }
}
