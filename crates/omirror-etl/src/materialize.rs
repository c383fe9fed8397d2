//! Bounded-memory conversion of a record stream into Parquet part files
//!
//! At most `chunk_size` records are buffered. Each full buffer is encoded to
//! a local staging file, hashed, and published under
//! `{dir}/{basename}_{part:05}.parquet` before the next chunk is read.

use crate::error::{EtlError, Result};
use crate::record::{validate_record, Record, RecordStream};
use crate::storage::{join_key, Storage};
use arrow::datatypes::SchemaRef;
use arrow::json::ReaderBuilder;
use futures::StreamExt;
use omirror_common::checksum::Sha256Summary;
use omirror_common::logging::LogProgress;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, instrument};

/// Rows per Arrow record batch inside a part file
const BATCH_ROWS: usize = 8_192;

/// One published part file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartInfo {
    pub name: String,
    pub rows: u64,
    pub bytes: u64,
    pub sha256: String,
}

/// Result of a successful materialization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializeOutput {
    pub parts: Vec<PartInfo>,
    pub records: u64,
}

impl MaterializeOutput {
    pub fn parts_written(&self) -> usize {
        self.parts.len()
    }
}

#[derive(Debug, Clone)]
pub struct ChunkedMaterializer {
    chunk_size: usize,
    staging_dir: Option<PathBuf>,
}

impl ChunkedMaterializer {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            staging_dir: None,
        }
    }

    pub fn with_staging_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.staging_dir = dir;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn part_name(basename: &str, part: usize) -> String {
        format!("{}_{:05}.parquet", basename, part)
    }

    /// Drain `records` into part files under `dir`. An empty stream writes
    /// nothing and succeeds.
    #[instrument(skip(self, records, schema, storage), fields(dest = %storage.describe()))]
    pub async fn materialize(
        &self,
        mut records: RecordStream,
        schema: SchemaRef,
        storage: &dyn Storage,
        dir: &str,
        basename: &str,
    ) -> Result<MaterializeOutput> {
        storage.mkdir(dir).await?;

        let mut output = MaterializeOutput::default();
        let mut buf: Vec<Record> = Vec::with_capacity(self.chunk_size.min(BATCH_ROWS));
        let mut progress = LogProgress::new(format!("materialize {}", dir), 0).log_every(100_000);

        while let Some(record) = records.next().await {
            let record = record?;
            validate_record(&schema, &record)?;
            buf.push(record);
            progress.update(1);

            if buf.len() >= self.chunk_size {
                let rows = std::mem::replace(
                    &mut buf,
                    Vec::with_capacity(self.chunk_size.min(BATCH_ROWS)),
                );
                let part = self
                    .flush(rows, &schema, storage, dir, basename, output.parts.len())
                    .await?;
                output.records += part.rows;
                output.parts.push(part);
            }
        }

        if !buf.is_empty() {
            let part = self
                .flush(buf, &schema, storage, dir, basename, output.parts.len())
                .await?;
            output.records += part.rows;
            output.parts.push(part);
        }

        progress.complete();
        info!(
            dir,
            parts = output.parts.len(),
            records = output.records,
            "Materialized partition"
        );
        Ok(output)
    }

    async fn flush(
        &self,
        rows: Vec<Record>,
        schema: &SchemaRef,
        storage: &dyn Storage,
        dir: &str,
        basename: &str,
        part: usize,
    ) -> Result<PartInfo> {
        let name = Self::part_name(basename, part);
        let key = join_key(&[dir, name.as_str()]);
        let row_count = rows.len() as u64;

        let schema = schema.clone();
        let staging_dir = self.staging_dir.clone();
        let (staged, summary) = tokio::task::spawn_blocking(move || -> Result<_> {
            let mut builder = tempfile::Builder::new();
            builder.prefix("omirror-").suffix(".parquet");
            let mut staged = match &staging_dir {
                Some(dir) => {
                    std::fs::create_dir_all(dir)?;
                    builder.tempfile_in(dir)?
                },
                None => builder.tempfile()?,
            };
            write_parquet(&rows, schema, staged.as_file_mut())?;
            drop(rows);
            let summary = Sha256Summary::from_file(staged.path())?;
            Ok((staged, summary))
        })
        .await??;

        let published = storage.put_file(&key, staged.path()).await?;
        if published != summary.bytes {
            return Err(EtlError::Storage(format!(
                "published {} bytes for {} but staged {}",
                published, key, summary.bytes
            )));
        }
        // staging file is removed on drop
        drop(staged);

        debug!(key = %key, rows = row_count, bytes = published, "Wrote part");
        Ok(PartInfo {
            name,
            rows: row_count,
            bytes: published,
            sha256: summary.hex,
        })
    }
}

/// Encode `rows` as a zstd-compressed Parquet file
pub fn write_parquet(rows: &[Record], schema: SchemaRef, out: &mut std::fs::File) -> Result<()> {
    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::default()))
        .build();
    let mut writer = ArrowWriter::try_new(out, schema.clone(), Some(props))?;
    let mut decoder = ReaderBuilder::new(schema)
        .with_batch_size(BATCH_ROWS)
        .build_decoder()?;

    for slice in rows.chunks(BATCH_ROWS) {
        decoder.serialize(slice)?;
        if let Some(batch) = decoder.flush()? {
            writer.write(&batch)?;
        }
    }
    writer.close()?;
    Ok(())
}
