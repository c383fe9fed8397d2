//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use omirror_etl::record::{records_from_vec, RecordSource, RecordStream};
use omirror_etl::sra::MirrorEntry;
use omirror_etl::{EtlError, Result};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub const BASE: &str = "https://ftp.example.org/sra/reports/Mirroring";

pub fn mirror_url(snapshot: &str, entity: &str) -> String {
    format!(
        "{}/NCBI_SRA_Mirroring_{}/meta_{}_set.xml.gz",
        BASE, snapshot, entity
    )
}

/// Minimal rows that satisfy every SRA entity schema
pub fn rows(prefix: &str, n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| json!({"accession": format!("{}{}", prefix, i), "title": format!("record {}", i)}))
        .collect()
}

/// In-memory record source that counts how often each URL is opened
#[derive(Default)]
pub struct CountingSource {
    records: HashMap<String, Vec<Value>>,
    failing: Vec<String>,
    opens: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
}

impl CountingSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: impl Into<String>, records: Vec<Value>) -> Self {
        self.records.insert(url.into(), records);
        self
    }

    /// Opening `url` fails with an HTTP 404
    pub fn failing(mut self, url: impl Into<String>) -> Self {
        self.failing.push(url.into());
        self
    }

    pub fn opens(&self, url: &str) -> usize {
        self.opens.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_opens(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSource for CountingSource {
    async fn open(&self, entry: &MirrorEntry) -> Result<RecordStream> {
        *self.opens.lock().unwrap().entry(entry.url.clone()).or_default() += 1;
        self.total.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&entry.url) {
            return Err(EtlError::HttpStatus {
                status: 404,
                url: entry.url.clone(),
            });
        }
        Ok(records_from_vec(
            self.records.get(&entry.url).cloned().unwrap_or_default(),
        ))
    }
}

pub fn parquet_rows(path: &Path) -> usize {
    let file = std::fs::File::open(path).unwrap();
    ParquetRecordBatchReaderBuilder::try_new(file)
        .unwrap()
        .build()
        .unwrap()
        .map(|batch| batch.unwrap().num_rows())
        .sum()
}

/// Relative paths of every file under `root`, sorted
pub fn files_under(root: &Path) -> Vec<String> {
    fn walk(dir: &Path, root: &Path, out: &mut Vec<String>) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(&path, root, out);
            } else {
                out.push(path.strip_prefix(root).unwrap().display().to_string());
            }
        }
    }
    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}
