//! Daily BioSample extraction
//!
//! One partition per calendar day:
//! `biosample/year=YYYY/month=MM/day=DD/{data_00000.parquet, _done.json}`.
//! A day with no updated samples gets a marker and no part file.

use super::fetcher::BiosampleClient;
use super::schema::arrow_schema;
use crate::config::EtlConfig;
use crate::error::Result;
use crate::materialize::ChunkedMaterializer;
use crate::partition::{self, DoneMarker};
use crate::report::RunReport;
use crate::runner::{days_between, BoundedConcurrencyRunner, TaskOutcome};
use crate::storage::{join_key, Storage};
use chrono::{Datelike, NaiveDate};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

pub const ENTITY: &str = "biosample";

const BASENAME: &str = "data";

#[derive(Debug, Clone)]
pub struct BiosampleExtractor {
    client: BiosampleClient,
    storage: Arc<dyn Storage>,
    materializer: ChunkedMaterializer,
    root: String,
}

impl BiosampleExtractor {
    pub fn new(
        client: BiosampleClient,
        storage: Arc<dyn Storage>,
        materializer: ChunkedMaterializer,
    ) -> Self {
        Self {
            client,
            storage,
            materializer,
            root: ENTITY.to_string(),
        }
    }

    pub fn from_config(config: &EtlConfig, storage: Arc<dyn Storage>) -> Result<Self> {
        let materializer = ChunkedMaterializer::new(config.biosample.chunk_size)
            .with_staging_dir(config.staging_dir.clone());
        Ok(Self::new(BiosampleClient::from_config(config)?, storage, materializer))
    }

    pub fn day_dir(&self, day: NaiveDate) -> String {
        join_key(&[
            self.root.clone(),
            format!("year={:04}", day.year()),
            format!("month={:02}", day.month()),
            format!("day={:02}", day.day()),
        ])
    }

    /// Fetch and materialize one day unless it is already marked done
    #[instrument(skip(self))]
    pub async fn extract_day(&self, day: NaiveDate) -> Result<TaskOutcome> {
        let storage = self.storage.as_ref();
        let dir = self.day_dir(day);

        if partition::is_done(storage, &dir).await? {
            return Ok(TaskOutcome::Skipped);
        }

        let stale = partition::remove_stale_parts(storage, &dir, BASENAME).await?;
        if stale > 0 {
            warn!(dir = %dir, stale, "Removed parts from an unfinished run");
        }

        let output = self
            .materializer
            .materialize(self.client.samples(day), arrow_schema(), storage, &dir, BASENAME)
            .await?;

        let marker = DoneMarker::new(self.client.day_url(day), ENTITY, day, true, &output);
        partition::write_marker(storage, &dir, &marker).await?;

        if output.records == 0 {
            info!(dir = %dir, "No samples updated on this day");
        } else {
            info!(
                dir = %dir,
                records = output.records,
                parts = output.parts_written(),
                "Day complete"
            );
        }
        Ok(TaskOutcome::Processed {
            records: output.records,
        })
    }

    /// Extract every day in `[start, end]` with at most `concurrency` days
    /// in flight
    pub async fn extract(
        self: Arc<Self>,
        start: NaiveDate,
        end: NaiveDate,
        concurrency: usize,
        heartbeat_interval: Duration,
    ) -> RunReport {
        let days = days_between(start, end);
        if days.is_empty() {
            warn!(start = %start, end = %end, "Empty date range, nothing to extract");
            return RunReport::default();
        }
        info!(
            start = %start,
            end = %end,
            days = days.len(),
            dest = %self.storage.describe(),
            "Starting BioSample extraction"
        );

        let runner =
            BoundedConcurrencyRunner::new("biosample_extract", concurrency, heartbeat_interval);
        runner
            .run(days, move |day| {
                let this = self.clone();
                async move { this.extract_day(day).await }
            })
            .await
    }
}
