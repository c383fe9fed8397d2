//! Date-driven batch driver
//!
//! Runs one task per calendar day with at most `concurrency` tasks in
//! flight. A failing (or panicking) day is recorded in the report and never
//! affects its siblings.

use crate::error::Result;
use crate::heartbeat::{Heartbeat, Progress, MIN_HEARTBEAT_INTERVAL};
use crate::report::RunReport;
use chrono::NaiveDate;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// What a day task did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Processed { records: u64 },
    /// Done marker already present
    Skipped,
}

#[derive(Debug, Clone)]
pub struct BoundedConcurrencyRunner {
    label: String,
    concurrency: usize,
    heartbeat_interval: Duration,
}

type Joined = (NaiveDate, std::result::Result<Result<TaskOutcome>, String>);

impl BoundedConcurrencyRunner {
    pub fn new(label: impl Into<String>, concurrency: usize, heartbeat_interval: Duration) -> Self {
        Self {
            label: label.into(),
            concurrency: concurrency.max(1),
            heartbeat_interval: heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Run `task` for every day. Returns once all tasks have finished.
    pub async fn run<F, Fut>(&self, days: Vec<NaiveDate>, task: F) -> RunReport
    where
        F: Fn(NaiveDate) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TaskOutcome>> + Send + 'static,
    {
        info!(
            task = %self.label,
            days = days.len(),
            concurrency = self.concurrency,
            "Starting bounded run"
        );

        let progress = Arc::new(Progress::new(days.len()));
        let heartbeat = Heartbeat::spawn(&self.label, self.heartbeat_interval, progress.clone());
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let task = Arc::new(task);
        let mut set: JoinSet<Joined> = JoinSet::new();
        let mut report = RunReport::default();

        for day in days {
            // keep draining finished tasks while waiting for a slot
            let permit = loop {
                tokio::select! {
                    permit = semaphore.clone().acquire_owned() => break permit,
                    Some(joined) = set.join_next() => {
                        self.record(joined, &progress, &mut report);
                    }
                }
            };
            let permit = match permit {
                Ok(permit) => permit,
                Err(e) => {
                    report.record_failed(day.to_string(), &self.label, e);
                    progress.record_failed();
                    continue;
                },
            };

            let task = task.clone();
            set.spawn(async move {
                let _permit = permit;
                let outcome = AssertUnwindSafe(task(day))
                    .catch_unwind()
                    .await
                    .map_err(panic_message);
                (day, outcome)
            });
        }

        while let Some(joined) = set.join_next().await {
            self.record(joined, &progress, &mut report);
        }

        heartbeat.stop().await;
        info!(task = %self.label, "Run finished: {}", report);
        report
    }

    fn record(
        &self,
        joined: std::result::Result<Joined, tokio::task::JoinError>,
        progress: &Progress,
        report: &mut RunReport,
    ) {
        match joined {
            Ok((day, Ok(Ok(TaskOutcome::Processed { records })))) => {
                progress.record_completed(records);
                report.record_processed(day.to_string(), records);
            },
            Ok((day, Ok(Ok(TaskOutcome::Skipped)))) => {
                progress.record_skipped();
                report.record_skipped(day.to_string());
            },
            Ok((day, Ok(Err(e)))) => {
                error!(task = %self.label, day = %day, error = %e, "Day failed");
                progress.record_failed();
                report.record_failed(day.to_string(), &self.label, e);
            },
            Ok((day, Err(panic))) => {
                error!(task = %self.label, day = %day, "Day task panicked: {}", panic);
                progress.record_failed();
                report.record_failed(day.to_string(), &self.label, format!("panic: {}", panic));
            },
            Err(e) => {
                // tasks catch their own panics, so only cancellation lands here
                warn!(task = %self.label, "Task did not complete: {}", e);
                progress.record_failed();
                report.record_failed("unknown", &self.label, e);
            },
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Every day from `start` to `end`, inclusive
pub fn days_between(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= end).collect()
}
