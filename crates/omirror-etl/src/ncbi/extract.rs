//! Full-dump extraction of NCBI BioSample and BioProject
//!
//! Each dump is materialized into a partition named after the run day:
//!
//! ```text
//! ncbi/{biosample|bioproject}/date={YYYY-MM-DD}/data_00000.parquet
//!                                               /_done.json
//! ```
//!
//! A rerun on the same day resumes (or skips) that partition. Once a
//! partition is marked done, partitions of earlier days for the same dump
//! are deleted.

use super::dump::{DumpKind, NcbiDump};
use super::schema::arrow_schema;
use crate::config::EtlConfig;
use crate::error::Result;
use crate::materialize::ChunkedMaterializer;
use crate::partition::{self, DoneMarker};
use crate::record::RecordSource;
use crate::report::RunReport;
use crate::sra::ProcessOutcome;
use crate::storage::{dir_prefix, join_key, Storage};
use chrono::NaiveDate;
use omirror_common::logging::LogProgress;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};

pub const ROOT: &str = "ncbi";

const BASENAME: &str = "data";

#[derive(Debug, Clone)]
pub struct NcbiDumpExtractor {
    storage: Arc<dyn Storage>,
    root: String,
    materializer: ChunkedMaterializer,
}

impl NcbiDumpExtractor {
    pub fn new(storage: Arc<dyn Storage>, materializer: ChunkedMaterializer) -> Self {
        Self {
            storage,
            root: ROOT.to_string(),
            materializer,
        }
    }

    pub fn from_config(config: &EtlConfig, storage: Arc<dyn Storage>) -> Self {
        let materializer = ChunkedMaterializer::new(config.ncbi.chunk_size)
            .with_staging_dir(config.staging_dir.clone());
        Self::new(storage, materializer)
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn kind_dir(&self, kind: DumpKind) -> String {
        join_key(&[self.root.as_str(), kind.as_str()])
    }

    pub fn partition_dir(&self, kind: DumpKind, day: NaiveDate) -> String {
        join_key(&[self.kind_dir(kind), format!("date={}", day.format("%Y-%m-%d"))])
    }

    /// Materialize every dump for `day`, one after another. A failed dump is
    /// recorded and the next one proceeds.
    pub async fn extract(
        &self,
        dumps: &[NcbiDump],
        day: NaiveDate,
        source: &dyn RecordSource<NcbiDump>,
    ) -> RunReport {
        info!(
            dumps = dumps.len(),
            day = %day,
            dest = %self.storage.describe(),
            "Starting NCBI dump extraction"
        );

        let mut report = RunReport::default();
        let mut progress = LogProgress::new("extract_ncbi_dumps", dumps.len()).log_every(1);

        for dump in dumps {
            let dir = self.partition_dir(dump.kind, day);
            let span = info_span!("extract_dump", kind = %dump.kind, day = %day);
            match self.extract_one(dump, day, source).instrument(span).await {
                Ok(ProcessOutcome::Written { records, .. }) => report.record_processed(dir, records),
                Ok(ProcessOutcome::AlreadyDone) => report.record_skipped(dir),
                Err(e) => {
                    error!(url = %dump.url, kind = %dump.kind, error = %e, "Failed to extract dump");
                    report.record_failed(dir, &dump.url, e);
                },
            }
            progress.update(1);
        }

        progress.complete();
        report
    }

    pub async fn extract_one(
        &self,
        dump: &NcbiDump,
        day: NaiveDate,
        source: &dyn RecordSource<NcbiDump>,
    ) -> Result<ProcessOutcome> {
        let storage = self.storage.as_ref();
        let dir = self.partition_dir(dump.kind, day);

        let outcome = if partition::is_done(storage, &dir).await? {
            info!(dir = %dir, "Dump already extracted today, skipping");
            ProcessOutcome::AlreadyDone
        } else {
            let stale = partition::remove_stale_parts(storage, &dir, BASENAME).await?;
            if stale > 0 {
                info!(dir = %dir, stale, "Removed parts from an unfinished run");
            }

            info!(url = %dump.url, dir = %dir, "Extracting dump");
            let records = source.open(dump).await?;
            let output = self
                .materializer
                .materialize(records, arrow_schema(dump.kind), storage, &dir, BASENAME)
                .await?;

            let marker = DoneMarker::new(&dump.url, dump.kind.as_str(), day, true, &output);
            partition::write_marker(storage, &dir, &marker).await?;
            info!(
                dir = %dir,
                records = output.records,
                parts = output.parts_written(),
                "Dump complete"
            );
            ProcessOutcome::Written {
                parts: output.parts_written(),
                records: output.records,
            }
        };

        self.remove_superseded(dump.kind, &dir).await?;
        Ok(outcome)
    }

    /// Delete every partition of `kind` other than `keep`. Returns the
    /// number of partitions removed.
    pub async fn remove_superseded(&self, kind: DumpKind, keep: &str) -> Result<usize> {
        let base = dir_prefix(&self.kind_dir(kind));
        let keep = keep.trim_matches('/');

        let dirs: BTreeSet<String> = self
            .storage
            .list(&base)
            .await?
            .iter()
            .filter_map(|key| key.strip_prefix(base.as_str()))
            .filter_map(|rest| rest.split_once('/').map(|(dir, _)| format!("{}{}", base, dir)))
            .filter(|dir| dir != keep)
            .collect();

        for dir in &dirs {
            let removed = self.storage.remove_prefix(dir).await?;
            info!(dir = %dir, removed, "Removed superseded dump partition");
        }
        Ok(dirs.len())
    }
}
