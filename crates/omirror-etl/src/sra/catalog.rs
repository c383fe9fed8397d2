//! Partition catalog for SRA mirror entries
//!
//! Layout under the storage root:
//!
//! ```text
//! {entity}/date={YYYY-MM-DD}/stage={Full|Incremental}/data_00000.parquet
//!                                                    /data_00001.parquet
//!                                                    /_done.json
//! ```
//!
//! `process` only writes current-batch partitions and `cleanup` only deletes
//! superseded ones, so the two never touch the same directory.

use super::mirror::MirrorEntry;
use super::schema::arrow_schema;
use crate::error::Result;
use crate::materialize::ChunkedMaterializer;
use crate::partition::{self, DoneMarker};
use crate::record::RecordSource;
use crate::report::RunReport;
use crate::storage::{join_key, Storage};
use omirror_common::logging::LogProgress;
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};

/// Single-file artifact written by earlier layouts
pub const LEGACY_FILE: &str = "data_0.ndjson.gz";

const BASENAME: &str = "data";

/// What `process_one` did with an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Written { parts: usize, records: u64 },
    AlreadyDone,
}

#[derive(Debug, Clone)]
pub struct PartitionCatalog {
    storage: Arc<dyn Storage>,
    root: String,
    materializer: ChunkedMaterializer,
}

impl PartitionCatalog {
    pub fn new(storage: Arc<dyn Storage>, materializer: ChunkedMaterializer) -> Self {
        Self {
            storage,
            root: String::new(),
            materializer,
        }
    }

    /// Place all partitions under `root` inside the storage
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn partition_dir(&self, entry: &MirrorEntry) -> String {
        join_key(&[self.root.as_str(), &entry.partition_dir()])
    }

    pub fn legacy_path(&self, entry: &MirrorEntry) -> String {
        join_key(&[self.partition_dir(entry).as_str(), LEGACY_FILE])
    }

    /// Materialize every current-batch entry that is not already marked done.
    /// Entries run one after another; a failure is recorded and the next
    /// entry proceeds.
    pub async fn process(&self, entries: &[MirrorEntry], source: &dyn RecordSource) -> RunReport {
        let current: Vec<&MirrorEntry> = entries.iter().filter(|e| e.in_current_batch).collect();
        info!(
            total_entries = entries.len(),
            current_batch = current.len(),
            "Starting batch processing"
        );

        let mut report = RunReport::default();
        let mut progress = LogProgress::new("process_mirror_entries", current.len()).log_every(1);

        for entry in current {
            let dir = self.partition_dir(entry);
            let span = info_span!(
                "process_entry",
                entity = %entry.entity,
                date = %entry.snapshot_date,
                stage = %entry.stage
            );
            match self.process_one(entry, source).instrument(span).await {
                Ok(ProcessOutcome::Written { records, .. }) => report.record_processed(dir, records),
                Ok(ProcessOutcome::AlreadyDone) => report.record_skipped(dir),
                Err(e) => {
                    error!(
                        url = %entry.url,
                        entity = %entry.entity,
                        date = %entry.snapshot_date,
                        stage = %entry.stage,
                        error = %e,
                        "Failed to process entry"
                    );
                    report.record_failed(dir, &entry.url, e);
                },
            }
            progress.update(1);
        }

        progress.complete();
        report
    }

    /// Process a single entry regardless of its batch flag
    pub async fn process_one(
        &self,
        entry: &MirrorEntry,
        source: &dyn RecordSource,
    ) -> Result<ProcessOutcome> {
        let storage = self.storage.as_ref();
        let dir = self.partition_dir(entry);

        if partition::is_done(storage, &dir).await? {
            info!(dir = %dir, "Partition already done, skipping");
            return Ok(ProcessOutcome::AlreadyDone);
        }

        let stale = partition::remove_stale_parts(storage, &dir, BASENAME).await?;
        if stale > 0 {
            info!(dir = %dir, stale, "Removed parts from an unfinished run");
        }

        info!(url = %entry.url, dir = %dir, "Processing entry");
        let records = source.open(entry).await?;
        let output = self
            .materializer
            .materialize(records, arrow_schema(entry.entity), storage, &dir, BASENAME)
            .await?;

        let marker = DoneMarker::new(
            &entry.url,
            entry.entity.as_str(),
            entry.snapshot_date,
            entry.is_full(),
            &output,
        );
        partition::write_marker(storage, &dir, &marker).await?;

        Ok(ProcessOutcome::Written {
            parts: output.parts_written(),
            records: output.records,
        })
    }

    /// Delete every superseded entry's partition and its legacy file.
    /// Missing directories are not an error.
    pub async fn cleanup(&self, entries: &[MirrorEntry]) -> RunReport {
        let stale: Vec<&MirrorEntry> = entries.iter().filter(|e| !e.in_current_batch).collect();
        info!(
            total_entries = entries.len(),
            to_cleanup = stale.len(),
            "Starting cleanup"
        );

        let mut report = RunReport::default();
        let mut progress = LogProgress::new("cleanup_entries", stale.len()).log_every(10);

        for entry in stale {
            let dir = self.partition_dir(entry);
            match self.cleanup_one(entry).await {
                Ok(_) => report.record_processed(dir, 0),
                Err(e) => {
                    error!(
                        url = %entry.url,
                        entity = %entry.entity,
                        error = %e,
                        "Failed to cleanup entry"
                    );
                    report.record_failed(dir, &entry.url, e);
                },
            }
            progress.update(1);
        }

        progress.complete();
        report
    }

    /// Returns the number of keys removed
    pub async fn cleanup_one(&self, entry: &MirrorEntry) -> Result<usize> {
        let dir = self.partition_dir(entry);
        let removed = self.storage.remove_prefix(&dir).await?;
        self.storage.unlink(&self.legacy_path(entry), true).await?;
        info!(dir = %dir, removed, "Cleaned up partition");
        Ok(removed)
    }
}
