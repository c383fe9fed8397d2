//! Per-run outcome summary

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    /// Partition directory (or day) that failed
    pub partition: String,
    /// Source URL or request filter
    pub source: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub processed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<Failure>,
    pub records_written: u64,
}

impl RunReport {
    pub fn record_processed(&mut self, partition: impl Into<String>, records: u64) {
        self.processed.push(partition.into());
        self.records_written += records;
    }

    pub fn record_skipped(&mut self, partition: impl Into<String>) {
        self.skipped.push(partition.into());
    }

    pub fn record_failed(
        &mut self,
        partition: impl Into<String>,
        source: impl Into<String>,
        error: impl fmt::Display,
    ) {
        self.failed.push(Failure {
            partition: partition.into(),
            source: source.into(),
            error: error.to_string(),
        });
    }

    pub fn merge(&mut self, other: RunReport) {
        self.processed.extend(other.processed);
        self.skipped.extend(other.skipped);
        self.failed.extend(other.failed);
        self.records_written += other.records_written;
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processed, {} skipped, {} failed ({} records written)",
            self.processed.len(),
            self.skipped.len(),
            self.failed.len(),
            self.records_written
        )?;
        for failure in &self.failed {
            write!(f, "\n  {} ({}): {}", failure.partition, failure.source, failure.error)?;
        }
        Ok(())
    }
}
