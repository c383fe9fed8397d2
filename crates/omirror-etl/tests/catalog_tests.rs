//! Partition catalog integration tests
//!
//! Run the SRA catalog against a local storage root with an in-memory
//! record source and inspect the files it leaves behind.

mod common;

use common::{files_under, mirror_url, parquet_rows, rows, CountingSource};
use omirror_etl::materialize::ChunkedMaterializer;
use omirror_etl::partition::{self, DONE_MARKER};
use omirror_etl::sra::{classify, MirrorEntry, PartitionCatalog};
use omirror_etl::storage::{LocalStorage, Storage};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    catalog: PartitionCatalog,
    entries: Vec<MirrorEntry>,
    incremental: String,
    full: String,
    old_full: String,
}

fn setup(chunk_size: usize) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(LocalStorage::new(dir.path()));
    let catalog = PartitionCatalog::new(storage, ChunkedMaterializer::new(chunk_size));

    let incremental = mirror_url("20250103_Incremental", "study");
    let full = mirror_url("20250101_Full", "study");
    let old_full = mirror_url("20241201_Full", "study");
    let entries = classify(&[full.clone(), incremental.clone(), old_full.clone()]);

    Fixture {
        dir,
        catalog,
        entries,
        incremental,
        full,
        old_full,
    }
}

fn source(f: &Fixture) -> CountingSource {
    CountingSource::new()
        .with(&f.incremental, rows("SRP1", 3))
        .with(&f.full, rows("SRP2", 12))
        .with(&f.old_full, rows("SRP3", 4))
}

// ============================================================================
// Idempotence
// ============================================================================

#[tokio::test]
async fn test_process_twice_writes_once() {
    let f = setup(5);
    let source = source(&f);

    let first = f.catalog.process(&f.entries, &source).await;
    assert_eq!(first.processed.len(), 2);
    assert!(first.skipped.is_empty());
    assert!(!first.has_failures());
    assert_eq!(first.records_written, 15);

    let second = f.catalog.process(&f.entries, &source).await;
    assert!(second.processed.is_empty());
    assert_eq!(second.skipped.len(), 2);

    assert_eq!(source.opens(&f.incremental), 1);
    assert_eq!(source.opens(&f.full), 1);
    assert_eq!(source.opens(&f.old_full), 0);
}

#[tokio::test]
async fn test_parts_and_marker_contents() {
    let f = setup(5);
    let source = source(&f);
    f.catalog.process(&f.entries, &source).await;

    let full_dir = "study/date=2025-01-01/stage=Full";
    let files = files_under(&f.dir.path().join(full_dir));
    assert_eq!(
        files,
        vec![
            DONE_MARKER.to_string(),
            "data_00000.parquet".to_string(),
            "data_00001.parquet".to_string(),
            "data_00002.parquet".to_string(),
        ]
    );
    let sizes: Vec<usize> = ["data_00000.parquet", "data_00001.parquet", "data_00002.parquet"]
        .iter()
        .map(|name| parquet_rows(&f.dir.path().join(full_dir).join(name)))
        .collect();
    assert_eq!(sizes, vec![5, 5, 2]);

    let storage = f.catalog.storage().as_ref();
    let marker = partition::read_marker(storage, full_dir).await.unwrap();
    assert_eq!(marker.source_url, f.full);
    assert_eq!(marker.entity, "study");
    assert!(marker.is_full);
    assert_eq!(marker.parts_written, 3);
    assert_eq!(marker.records_written, 12);
    assert_eq!(marker.parts.iter().map(|p| p.rows).sum::<u64>(), 12);
}

#[tokio::test]
async fn test_empty_entry_gets_marker_without_parts() {
    let f = setup(5);
    let source = CountingSource::new().with(&f.full, rows("SRP2", 2));

    let report = f.catalog.process(&f.entries, &source).await;
    assert_eq!(report.processed.len(), 2);

    let inc_dir = "study/date=2025-01-03/stage=Incremental";
    assert_eq!(
        files_under(&f.dir.path().join(inc_dir)),
        vec![DONE_MARKER.to_string()]
    );
    let marker = partition::read_marker(f.catalog.storage().as_ref(), inc_dir)
        .await
        .unwrap();
    assert_eq!(marker.parts_written, 0);
    assert_eq!(marker.records_written, 0);
}

// ============================================================================
// Crash safety
// ============================================================================

#[tokio::test]
async fn test_unmarked_partition_is_reprocessed() {
    let f = setup(5);
    let storage = f.catalog.storage().clone();
    let full_dir = "study/date=2025-01-01/stage=Full";

    // an interrupted run left parts behind but never wrote the marker
    storage
        .write(&format!("{}/data_00000.parquet", full_dir), b"partial".to_vec())
        .await
        .unwrap();
    storage
        .write(&format!("{}/data_00007.parquet", full_dir), b"partial".to_vec())
        .await
        .unwrap();

    let source = source(&f);
    let report = f.catalog.process(&f.entries, &source).await;
    assert!(!report.has_failures());
    assert_eq!(source.opens(&f.full), 1);

    assert!(partition::is_done(storage.as_ref(), full_dir).await.unwrap());
    let files = files_under(&f.dir.path().join(full_dir));
    assert!(!files.contains(&"data_00007.parquet".to_string()));
    assert_eq!(parquet_rows(&f.dir.path().join(full_dir).join("data_00000.parquet")), 5);
}

#[tokio::test]
async fn test_torn_marker_is_reprocessed() {
    let f = setup(5);
    let storage = f.catalog.storage().clone();
    let full_dir = "study/date=2025-01-01/stage=Full";

    // crash while the marker was being written
    storage
        .write(
            &format!("{}/{}", full_dir, DONE_MARKER),
            br#"{"completed_at":"20"#.to_vec(),
        )
        .await
        .unwrap();

    let source = source(&f);
    let report = f.catalog.process(&f.entries, &source).await;
    assert_eq!(report.processed.len(), 2);
    assert!(report.skipped.is_empty());
    assert_eq!(source.opens(&f.full), 1);

    let marker = partition::read_marker(storage.as_ref(), full_dir).await.unwrap();
    assert_eq!(marker.records_written, 12);
}

#[tokio::test]
async fn test_schema_violation_leaves_partition_unmarked() {
    let f = setup(5);
    let mut bad = rows("SRP2", 12);
    bad.push(json!({"title": "no accession"}));
    let source = CountingSource::new()
        .with(&f.incremental, rows("SRP1", 3))
        .with(&f.full, bad);

    let report = f.catalog.process(&f.entries, &source).await;
    assert_eq!(report.processed.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].source, f.full);
    assert!(report.failed[0].error.contains("accession"));

    let full_dir = "study/date=2025-01-01/stage=Full";
    let storage = f.catalog.storage().clone();
    assert!(!partition::is_done(storage.as_ref(), full_dir).await.unwrap());
    assert!(partition::is_done(storage.as_ref(), "study/date=2025-01-03/stage=Incremental")
        .await
        .unwrap());
    // two full chunks were published before the bad record
    assert_eq!(
        files_under(&f.dir.path().join(full_dir)),
        vec!["data_00000.parquet".to_string(), "data_00001.parquet".to_string()]
    );

    let fixed = CountingSource::new().with(&f.full, rows("SRP2", 3));
    let rerun = f.catalog.process(&f.entries, &fixed).await;
    assert_eq!(rerun.processed.len(), 1);
    assert_eq!(rerun.skipped.len(), 1);
    assert_eq!(
        files_under(&f.dir.path().join(full_dir)),
        vec![DONE_MARKER.to_string(), "data_00000.parquet".to_string()]
    );
    assert_eq!(parquet_rows(&f.dir.path().join(full_dir).join("data_00000.parquet")), 3);
}

#[tokio::test]
async fn test_failed_entry_is_isolated_and_unmarked() {
    let f = setup(5);
    let source = CountingSource::new()
        .with(&f.full, rows("SRP2", 3))
        .failing(&f.incremental);

    let report = f.catalog.process(&f.entries, &source).await;
    assert_eq!(report.processed.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].source, f.incremental);
    assert_eq!(
        report.failed[0].partition,
        "study/date=2025-01-03/stage=Incremental"
    );

    let storage = f.catalog.storage().as_ref();
    assert!(!partition::is_done(storage, "study/date=2025-01-03/stage=Incremental")
        .await
        .unwrap());
    assert!(partition::is_done(storage, "study/date=2025-01-01/stage=Full")
        .await
        .unwrap());
}

// ============================================================================
// Cleanup
// ============================================================================

#[tokio::test]
async fn test_process_then_cleanup_leaves_current_partitions() {
    let f = setup(5);
    let source = source(&f);
    let storage = f.catalog.storage().clone();

    // the superseded snapshot was mirrored by an earlier run, including the
    // single-file layout
    let old = f.entries.iter().find(|e| e.url == f.old_full).unwrap();
    assert!(!old.in_current_batch);
    f.catalog.process_one(old, &source).await.unwrap();
    storage
        .write(&f.catalog.legacy_path(old), b"legacy".to_vec())
        .await
        .unwrap();

    f.catalog.process(&f.entries, &source).await;
    let report = f.catalog.cleanup(&f.entries).await;
    assert_eq!(report.processed.len(), 1);
    assert!(!report.has_failures());

    let files = files_under(f.dir.path());
    assert!(files.iter().all(|p| !p.contains("date=2024-12-01")));
    assert!(files.iter().any(|p| p.starts_with("study/date=2025-01-01/stage=Full/")));
    assert!(files
        .iter()
        .any(|p| p.starts_with("study/date=2025-01-03/stage=Incremental/")));

    // cleaning again is a no-op
    let again = f.catalog.cleanup(&f.entries).await;
    assert!(!again.has_failures());
}
