//! Runs one settlement job from RUNNING to a terminal status.

use chrono::Utc;
use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::broadcast::{JobProgressBroadcaster, JobProgressTracker};
use crate::error::StoreError;
use crate::job::{JobStatus, SettlementJob};
use crate::ports::{JobStoreRef, SettlementSinkRef, TransactionSourceRef};
use crate::settlement::{fold_page, CsvExporter, SettlementMap};

/// Default number of transactions fetched per page.
pub const DEFAULT_PAGE_SIZE: u64 = 10_000;

/// Message recorded on jobs interrupted by a pool shutdown.
pub const SHUTDOWN_MESSAGE: &str = "interrupted by worker pool shutdown";

/// How a job left the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { result_path: String, rows: usize },
    Cancelled { processed: u64 },
    Failed(String),
    /// The RUNNING transition could not be persisted; nothing was done.
    Skipped,
}

/// Counters for the page loop.
#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    processed: u64,
    total: u64,
}

impl Counters {
    fn progress(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        (self.processed.saturating_mul(100) / self.total).min(100) as u8
    }
}

/// Everything a worker needs to process settlement jobs.
#[derive(Clone)]
pub struct SettlementProcessor {
    jobs: JobStoreRef,
    source: TransactionSourceRef,
    sink: SettlementSinkRef,
    exporter: CsvExporter,
    progress: JobProgressBroadcaster,
    page_size: u64,
}

impl SettlementProcessor {
    pub fn new(
        jobs: JobStoreRef,
        source: TransactionSourceRef,
        sink: SettlementSinkRef,
        exporter: CsvExporter,
        progress: JobProgressBroadcaster,
    ) -> Self {
        Self {
            jobs,
            source,
            sink,
            exporter,
            progress,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Processes `job` synchronously. `stopping` reports a pool-wide stop and
    /// is polled alongside the job's cancel signal before every page.
    pub fn process(&self, job: &SettlementJob, stopping: &dyn Fn() -> bool) -> JobOutcome {
        let span = tracing::info_span!("settlement.job", job_id = %job.id, run_id = %job.run_id);
        let _enter = span.enter();
        let tracker = self.progress.track(job.id);

        if let Err(e) = self.jobs.update_status(job.id, JobStatus::Running, None) {
            match e {
                StoreError::IllegalTransition { from, .. } => {
                    info!("Job {} is {} and will not be started", job.id, from)
                }
                other => error!("Failed to mark job {} running: {}", job.id, other),
            }
            return JobOutcome::Skipped;
        }
        if let Err(e) = self.jobs.update_started_at(job.id, Utc::now()) {
            return self.fail(&tracker, &format!("failed to record start time: {}", e));
        }
        tracker.status(JobStatus::Running, "Settlement started");
        info!(
            "Processing settlement job {} ({} to {})",
            job.id, job.range.from, job.range.to
        );

        let total = match self.source.count(&job.range) {
            Ok(total) => total,
            Err(e) => return self.fail(&tracker, &format!("failed to count transactions: {}", e)),
        };
        let mut counters = Counters {
            processed: 0,
            total,
        };
        let mut map = SettlementMap::new(job.run_id.clone());
        let mut offset = 0u64;

        loop {
            if job.cancel.is_cancelled() {
                return self.cancel(&tracker, counters);
            }
            if stopping() {
                return self.fail(&tracker, SHUTDOWN_MESSAGE);
            }
            if offset >= total {
                break;
            }

            let page = match self.source.get_page(&job.range, offset, self.page_size) {
                Ok(page) => page,
                Err(e) => {
                    return self.fail(
                        &tracker,
                        &format!("failed to fetch transactions at offset {}: {}", offset, e),
                    )
                }
            };
            if page.is_empty() {
                debug!("Source drained at offset {} of {}", offset, total);
                break;
            }

            fold_page(&page, &mut map);
            offset += page.len() as u64;
            counters.processed = offset.min(total);
            let progress = counters.progress();

            if let Err(e) = self.jobs.update_progress(job.id, progress, counters.processed) {
                warn!("Failed to persist progress for job {}: {}", job.id, e);
            }
            tracker.page(counters.processed, total, progress);
            info!(
                "Job {}: processed {}/{} ({}%)",
                job.id, counters.processed, total, progress
            );
        }

        let rows = map.into_rows();
        if let Err(e) = self.sink.upsert_batch(&rows) {
            return self.fail(&tracker, &format!("failed to upsert settlements: {}", e));
        }

        let path = match self.exporter.export(job.id, &rows) {
            Ok(path) => path.to_string_lossy().into_owned(),
            Err(e) => return self.fail(&tracker, &e.to_string()),
        };

        if let Err(e) = self.jobs.complete(job.id, &path, Utc::now()) {
            return self.fail(&tracker, &format!("failed to mark job completed: {}", e));
        }
        tracker.completed(total, &path);
        info!(
            "Job {} completed: {} settlement rows written to {}",
            job.id,
            rows.len(),
            path
        );

        JobOutcome::Completed {
            result_path: path,
            rows: rows.len(),
        }
    }

    /// Finalizes as FAILED. Store errors here are logged and swallowed.
    fn fail(&self, tracker: &JobProgressTracker, message: &str) -> JobOutcome {
        let id = tracker.job_id();
        error!("Job {} failed: {}", id, message);
        if let Err(e) = self.jobs.update_status(id, JobStatus::Failed, Some(message)) {
            error!("Failed to mark job {} failed: {}", id, e);
        }
        self.stamp_completed(id);
        tracker.failed(message);
        JobOutcome::Failed(message.to_string())
    }

    /// Finalizes as CANCELLED; accumulated rows are discarded.
    fn cancel(&self, tracker: &JobProgressTracker, counters: Counters) -> JobOutcome {
        let id = tracker.job_id();
        info!(
            "Job {} cancelled after {}/{} transactions",
            id, counters.processed, counters.total
        );
        if let Err(e) = self.jobs.update_status(id, JobStatus::Cancelled, None) {
            error!("Failed to mark job {} cancelled: {}", id, e);
        }
        if let Err(e) = self.jobs.update_cancelled_flag(id, true) {
            error!("Failed to set cancelled flag on job {}: {}", id, e);
        }
        self.stamp_completed(id);
        tracker.cancelled(counters.processed, counters.total, counters.progress());
        JobOutcome::Cancelled {
            processed: counters.processed,
        }
    }

    fn stamp_completed(&self, id: Uuid) {
        if let Err(e) = self.jobs.update_completed_at(id, Utc::now()) {
            error!("Failed to stamp completion time on job {}: {}", id, e);
        }
    }
}
