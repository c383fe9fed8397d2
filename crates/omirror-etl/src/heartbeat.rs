//! Periodic liveness signal for long, quiet batch runs

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Progress counters written by the driver loop and read by the heartbeat
#[derive(Debug, Default)]
pub struct Progress {
    total: AtomicUsize,
    completed: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    records: AtomicU64,
}

/// Point-in-time copy of [`Progress`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub records: u64,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            total: AtomicUsize::new(total),
            ..Default::default()
        }
    }

    pub fn record_completed(&self, records: u64) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.records.fetch_add(records, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            records: self.records.load(Ordering::Relaxed),
        }
    }
}

impl ProgressSnapshot {
    pub fn finished(&self) -> usize {
        self.completed + self.skipped + self.failed
    }
}

/// Shortest accepted heartbeat period; smaller intervals are raised to it
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Background task logging progress every `interval` until stopped
pub struct Heartbeat {
    token: CancellationToken,
    handle: JoinHandle<u64>,
}

impl Heartbeat {
    pub fn spawn(label: impl Into<String>, interval: Duration, progress: Arc<Progress>) -> Self {
        let label = label.into();
        let interval = interval.max(MIN_HEARTBEAT_INTERVAL);
        let token = CancellationToken::new();
        let child = token.clone();

        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            let mut beats = 0u64;
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        beats += 1;
                        let snap = progress.snapshot();
                        info!(
                            task = %label,
                            elapsed_secs = started.elapsed().as_secs(),
                            finished = snap.finished(),
                            total = snap.total,
                            completed = snap.completed,
                            skipped = snap.skipped,
                            failed = snap.failed,
                            records = snap.records,
                            "heartbeat"
                        );
                    }
                }
            }
            beats
        });

        Self { token, handle }
    }

    /// Cancel the heartbeat and wait for it to exit; returns the number of
    /// beats emitted
    pub async fn stop(self) -> u64 {
        self.token.cancel();
        self.handle.await.unwrap_or(0)
    }
}
