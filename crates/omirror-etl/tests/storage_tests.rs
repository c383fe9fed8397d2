//! Storage backend integration tests
//!
//! The local backend always runs. S3 tests need a reachable endpoint:
//!
//! - `S3_ENDPOINT` (e.g. "http://localhost:9000" for MinIO)
//! - `S3_TEST_BUCKET` naming an existing bucket (default `omirror-test`)
//!
//! They are skipped when `S3_ENDPOINT` is not set.

use chrono::NaiveDate;
use omirror_etl::materialize::MaterializeOutput;
use omirror_etl::partition::{self, DoneMarker};
use omirror_etl::storage::{self, Storage, StorageConfig};
use std::sync::Arc;
use tokio::io::AsyncReadExt;

async fn setup_s3() -> Option<Arc<dyn Storage>> {
    if std::env::var("S3_ENDPOINT").is_err() {
        return None;
    }
    let bucket = std::env::var("S3_TEST_BUCKET").unwrap_or_else(|_| "omirror-test".to_string());
    let run = chrono::Utc::now().format("%Y%m%d%H%M%S%f");
    let dest = format!("s3://{}/test/{}", bucket, run);

    match storage::open(&dest, &StorageConfig::from_env()).await {
        Ok(storage) => Some(storage),
        Err(e) => {
            eprintln!("Failed to create storage client: {}", e);
            None
        },
    }
}

async fn exercise(storage: &dyn Storage) {
    let dir = "study/date=2025-01-01/stage=Full";

    storage
        .write(&format!("{}/data_00000.parquet", dir), b"part zero".to_vec())
        .await
        .unwrap();
    storage
        .write(&format!("{}/data_00001.parquet", dir), b"part one".to_vec())
        .await
        .unwrap();

    let mut reader = storage
        .open_read(&format!("{}/data_00001.parquet", dir))
        .await
        .unwrap();
    let mut body = String::new();
    reader.read_to_string(&mut body).await.unwrap();
    assert_eq!(body, "part one");

    let staged = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(staged.path(), b"staged part").unwrap();
    let bytes = storage
        .put_file(&format!("{}/data_00002.parquet", dir), staged.path())
        .await
        .unwrap();
    assert_eq!(bytes, 11);

    assert!(!partition::is_done(storage, dir).await.unwrap());
    let marker = DoneMarker::new(
        "https://example.org/meta_study_set.xml.gz",
        "study",
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
        true,
        &MaterializeOutput::default(),
    );
    partition::write_marker(storage, dir, &marker).await.unwrap();
    assert!(partition::is_done(storage, dir).await.unwrap());

    let parts = storage
        .glob(&format!("{}/data_*.parquet", dir))
        .await
        .unwrap();
    assert_eq!(parts.len(), 3);

    // sibling prefix must survive
    storage
        .write("study/date=2025-01-01/stage=Fullish/keep.txt", b"x".to_vec())
        .await
        .unwrap();

    assert_eq!(storage.remove_prefix(dir).await.unwrap(), 4);
    assert!(storage.list(&format!("{}/", dir)).await.unwrap().is_empty());
    assert_eq!(storage.remove_prefix(dir).await.unwrap(), 0);
    assert!(storage
        .exists("study/date=2025-01-01/stage=Fullish/keep.txt")
        .await
        .unwrap());

    storage
        .unlink("study/date=2025-01-01/stage=Fullish/keep.txt", false)
        .await
        .unwrap();
    storage
        .unlink("study/date=2025-01-01/stage=Fullish/keep.txt", true)
        .await
        .unwrap();
    assert!(storage
        .unlink("study/date=2025-01-01/stage=Fullish/keep.txt", false)
        .await
        .is_err());
}

#[tokio::test]
async fn test_local_storage_roundtrip() {
    let root = tempfile::tempdir().unwrap();
    let storage = storage::open(root.path().to_str().unwrap(), &StorageConfig::default())
        .await
        .unwrap();
    exercise(storage.as_ref()).await;
}

#[tokio::test]
async fn test_s3_storage_roundtrip() {
    let Some(storage) = setup_s3().await else {
        println!("Skipping test: S3_ENDPOINT not configured");
        return;
    };
    exercise(storage.as_ref()).await;
}
