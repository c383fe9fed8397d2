//! Done-marker protocol
//!
//! A partition directory is complete iff it holds a readable `_done.json`. The marker
//! is written strictly after every part file has been published, so an
//! interrupted run leaves the partition unmarked and it is redone.

use crate::error::{EtlError, Result};
use crate::materialize::{MaterializeOutput, PartInfo};
use crate::storage::{join_key, Storage};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DONE_MARKER: &str = "_done.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneMarker {
    pub completed_at: DateTime<Utc>,
    pub source_url: String,
    pub entity: String,
    pub date: NaiveDate,
    pub is_full: bool,
    pub parts_written: usize,
    pub records_written: u64,
    #[serde(default)]
    pub parts: Vec<PartInfo>,
}

impl DoneMarker {
    pub fn new(
        source_url: impl Into<String>,
        entity: impl Into<String>,
        date: NaiveDate,
        is_full: bool,
        output: &MaterializeOutput,
    ) -> Self {
        Self {
            completed_at: Utc::now(),
            source_url: source_url.into(),
            entity: entity.into(),
            date,
            is_full,
            parts_written: output.parts_written(),
            records_written: output.records,
            parts: output.parts.clone(),
        }
    }
}

pub fn marker_key(dir: &str) -> String {
    join_key(&[dir, DONE_MARKER])
}

/// A marker that exists but does not parse (torn write, foreign file) does
/// not count: the partition is redone and the marker rewritten.
pub async fn is_done(storage: &dyn Storage, dir: &str) -> Result<bool> {
    if !storage.exists(&marker_key(dir)).await? {
        return Ok(false);
    }
    match read_marker(storage, dir).await {
        Ok(_) => Ok(true),
        Err(EtlError::Json(e)) => {
            warn!(dir = %dir, error = %e, "Ignoring unreadable done marker");
            Ok(false)
        },
        Err(e) => Err(e),
    }
}

pub async fn read_marker(storage: &dyn Storage, dir: &str) -> Result<DoneMarker> {
    let bytes = storage.read(&marker_key(dir)).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub async fn write_marker(storage: &dyn Storage, dir: &str, marker: &DoneMarker) -> Result<()> {
    let body = serde_json::to_vec_pretty(marker)?;
    storage.write(&marker_key(dir), body).await
}

/// Remove part files left behind by an interrupted run. Keys other than
/// `{basename}_*.parquet` are kept.
pub async fn remove_stale_parts(storage: &dyn Storage, dir: &str, basename: &str) -> Result<usize> {
    let pattern = join_key(&[dir, &format!("{}_*.parquet", basename)]);
    let stale = storage.glob(&pattern).await?;
    for key in &stale {
        storage.unlink(key, true).await?;
    }
    Ok(stale.len())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;

    #[tokio::test]
    async fn test_marker_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let date = NaiveDate::from_ymd_opt(2025, 1, 3).unwrap();
        let output = MaterializeOutput {
            parts: vec![PartInfo {
                name: "data_00000.parquet".to_string(),
                rows: 3,
                bytes: 100,
                sha256: "ab".repeat(32),
            }],
            records: 3,
        };

        assert!(!is_done(&storage, "study/p").await.unwrap());
        let marker = DoneMarker::new("https://x/meta_study_set.xml.gz", "study", date, false, &output);
        write_marker(&storage, "study/p", &marker).await.unwrap();

        assert!(is_done(&storage, "study/p").await.unwrap());
        let back = read_marker(&storage, "study/p").await.unwrap();
        assert_eq!(back, marker);
        assert_eq!(back.parts_written, 1);
    }

    #[tokio::test]
    async fn test_truncated_marker_is_not_done() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage
            .write("study/p/_done.json", br#"{"completed_at":"20"#.to_vec())
            .await
            .unwrap();

        assert!(!is_done(&storage, "study/p").await.unwrap());
        assert!(read_marker(&storage, "study/p").await.is_err());
    }

    #[tokio::test]
    async fn test_remove_stale_parts_keeps_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage.write("p/data_00000.parquet", vec![0]).await.unwrap();
        storage.write("p/data_00001.parquet", vec![0]).await.unwrap();
        storage.write("p/notes.txt", vec![0]).await.unwrap();

        assert_eq!(remove_stale_parts(&storage, "p", "data").await.unwrap(), 2);
        assert_eq!(storage.list("p/").await.unwrap(), vec!["p/notes.txt".to_string()]);
    }
}
