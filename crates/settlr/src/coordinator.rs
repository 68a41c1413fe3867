//! Job coordinator: the entry point for submitting, inspecting and
//! cancelling settlement jobs.
//!
//! The coordinator owns the cancellation registry, the worker pool and a
//! single watcher thread. The watcher polls the job store every
//! `watch_interval` and retires the cancellation channel of every registered
//! job that has reached a terminal status. All of it lives exactly as long
//! as the coordinator; dropping it shuts everything down.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender, TrySendError};
use log::{debug, error, info, warn};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::config::Config;
use crate::db::Database;
use crate::error::{JobError, StoreError, WorkerError};
use crate::job::{DateRange, Job, JobStatus, SettlementJob};
use crate::ports::{JobStore, JobStoreRef, SettlementSinkRef, TransactionSourceRef};
use crate::settlement::CsvExporter;
use crate::worker::cancel::CancelRegistry;
use crate::worker::pool::WorkerPool;
use crate::worker::processor::SettlementProcessor;

struct Watcher {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct JobCoordinator {
    jobs: JobStoreRef,
    source: TransactionSourceRef,
    pool: WorkerPool,
    registry: Arc<CancelRegistry>,
    progress: JobProgressBroadcaster,
    batch_size: usize,
    watcher: Mutex<Option<Watcher>>,
    submitters: Mutex<Vec<JoinHandle<()>>>,
}

impl JobCoordinator {
    /// Builds the coordinator and starts its watcher. Workers are started
    /// separately with [`JobCoordinator::start_worker_pool`].
    pub fn new(
        jobs: JobStoreRef,
        source: TransactionSourceRef,
        sink: SettlementSinkRef,
        config: &Config,
    ) -> Result<Self, WorkerError> {
        let progress = JobProgressBroadcaster::default();
        let processor = SettlementProcessor::new(
            Arc::clone(&jobs),
            Arc::clone(&source),
            sink,
            CsvExporter::new(&config.export_directory),
            progress.clone(),
        )
        .with_page_size(config.page_size);
        let pool = WorkerPool::new(processor, config.worker_count, config.queue_capacity);
        let registry = Arc::new(CancelRegistry::new());
        let watcher = spawn_watcher(
            Arc::clone(&jobs),
            Arc::clone(&registry),
            config.watch_interval(),
        )?;

        Ok(Self {
            jobs,
            source,
            pool,
            registry,
            progress,
            batch_size: config.descriptor_batch_size,
            watcher: Mutex::new(Some(watcher)),
            submitters: Mutex::new(Vec::new()),
        })
    }

    /// Coordinator backed by one SQLite database for all three ports.
    pub fn with_database(db: Database, config: &Config) -> Result<Self, WorkerError> {
        let db = Arc::new(db);
        Self::new(db.clone(), db.clone(), db, config)
    }

    /// Validates the range, persists a QUEUED job and hands it to the pool.
    /// Returns as soon as the job is persisted; processing is asynchronous.
    pub fn create_settlement_job(&self, from: &str, to: &str) -> Result<Job, JobError> {
        let range = DateRange::parse(from, to).ok_or_else(|| JobError::InvalidDateRange {
            from: from.to_string(),
            to: to.to_string(),
        })?;
        if self.pool.is_stopped() {
            return Err(WorkerError::ChannelClosed.into());
        }

        let total = self.source.count(&range)?;
        let run_id = Uuid::new_v4().to_string();
        let params = serde_json::to_string(&range.to_params())?;

        let mut job = Job::new_settlement(params, total, run_id.clone());
        job.id = self.jobs.create(&job)?;

        let descriptor = SettlementJob {
            id: job.id,
            range,
            run_id,
            batch_size: self.batch_size,
            cancel: self.registry.register(job.id),
        };
        // Announced before enqueueing so it precedes any worker event.
        self.progress.send(
            JobProgressEvent::new(job.id, JobStatus::Queued, "Job queued for processing")
                .with_counts(0, total, 0),
        );
        if let Err(e) = self.enqueue(descriptor) {
            abandon(self.jobs.as_ref(), &self.registry, &self.progress, job.id, &e);
            return Err(e.into());
        }

        info!(
            "Queued settlement job {} for {}..{} ({} transactions)",
            job.id, range.from, range.to, total
        );
        Ok(job)
    }

    /// Non-blocking when the queue has room; otherwise a short-lived thread
    /// waits for room so the caller never blocks.
    fn enqueue(&self, descriptor: SettlementJob) -> Result<(), WorkerError> {
        let submitter = self.pool.submitter();
        match submitter.try_submit(descriptor) {
            Ok(()) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(WorkerError::ChannelClosed),
            Err(TrySendError::Full(descriptor)) => {
                let id = descriptor.id;
                warn!("Job queue full, job {} waits for room", id);
                let jobs = Arc::clone(&self.jobs);
                let registry = Arc::clone(&self.registry);
                let progress = self.progress.clone();
                let handle = thread::Builder::new()
                    .name(format!("settlr-submit-{}", id))
                    .spawn(move || {
                        if let Err(e) = submitter.submit(descriptor) {
                            abandon(jobs.as_ref(), &registry, &progress, id, &e);
                        }
                    })
                    .map_err(WorkerError::SpawnFailed)?;
                let mut submitters = lock_recovering(&self.submitters);
                submitters.retain(|h| !h.is_finished());
                submitters.push(handle);
                Ok(())
            }
        }
    }

    pub fn get_job(&self, id: Uuid) -> Result<Job, JobError> {
        self.jobs.get_by_id(id)?.ok_or(JobError::JobNotFound(id))
    }

    /// Requests cancellation and returns the job as stored afterwards.
    ///
    /// A QUEUED job is cancelled here directly. A RUNNING job is only
    /// signalled; its worker finalizes it at the next page boundary.
    pub fn cancel_job(&self, id: Uuid) -> Result<Job, JobError> {
        let job = self.get_job(id)?;
        if !job.status.is_cancellable() {
            return Err(JobError::JobCannotBeCancelled {
                id,
                status: job.status,
            });
        }

        if !self.registry.signal(id) {
            debug!("Job {} has no cancellation channel registered", id);
        }

        if job.status == JobStatus::Queued {
            match self.jobs.cancel_queued(id, Utc::now()) {
                Ok(()) => {
                    self.progress.send(JobProgressEvent::new(
                        id,
                        JobStatus::Cancelled,
                        "Job cancelled before start",
                    ));
                    info!("Cancelled queued job {}", id);
                }
                // Picked up in the meantime; the signal already sent applies.
                Err(StoreError::IllegalTransition {
                    from: JobStatus::Running,
                    ..
                }) => info!("Job {} started before cancel, signalled worker", id),
                Err(StoreError::IllegalTransition { from, .. }) => {
                    return Err(JobError::JobCannotBeCancelled { id, status: from })
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            info!("Signalled cancellation of running job {}", id);
        }

        self.get_job(id)
    }

    /// Starts the worker threads.
    pub fn start_worker_pool(&self) -> Result<(), WorkerError> {
        self.pool.start()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.progress.subscribe()
    }

    pub fn progress(&self) -> &JobProgressBroadcaster {
        &self.progress
    }

    /// Jobs whose cancellation channel is still registered.
    pub fn active_cancellations(&self) -> usize {
        self.registry.len()
    }

    /// Stops the pool and the watcher and joins every thread. Idempotent.
    pub fn shutdown(&self) {
        self.pool.stop();

        if let Some(watcher) = lock_recovering(&self.watcher).take() {
            drop(watcher.stop);
            if watcher.handle.join().is_err() {
                error!("Watcher thread panicked");
            }
        }

        let submitters: Vec<JoinHandle<()>> = lock_recovering(&self.submitters).drain(..).collect();
        for handle in submitters {
            if handle.join().is_err() {
                error!("Submit thread panicked");
            }
        }

        self.pool.wait();
    }
}

impl Drop for JobCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("Coordinator lock poisoned, recovering");
        poisoned.into_inner()
    })
}

fn spawn_watcher(
    jobs: JobStoreRef,
    registry: Arc<CancelRegistry>,
    interval: Duration,
) -> Result<Watcher, WorkerError> {
    let (stop, stop_rx) = bounded::<()>(0);
    let handle = thread::Builder::new()
        .name("settlr-watcher".to_string())
        .spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => retire_finished(jobs.as_ref(), &registry),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    debug!("Watcher stopped");
                    break;
                }
            }
        })
        .map_err(WorkerError::SpawnFailed)?;
    Ok(Watcher { stop, handle })
}

/// Finalizes a persisted job whose descriptor could not be queued.
fn abandon(
    jobs: &dyn JobStore,
    registry: &CancelRegistry,
    progress: &JobProgressBroadcaster,
    id: Uuid,
    cause: &WorkerError,
) {
    registry.retire(id);
    let message = format!("job could not be queued: {}", cause);
    error!("Job {}: {}", id, message);
    if let Err(e) = jobs.fail_queued(id, &message, Utc::now()) {
        error!("Failed to mark unqueued job {} failed: {}", id, e);
    }
    progress.send(JobProgressEvent::failed(id, &message));
}

/// Drops the cancellation channel of every registered job in a terminal
/// status or missing from the store.
fn retire_finished(jobs: &dyn JobStore, registry: &CancelRegistry) {
    for id in registry.ids() {
        match jobs.get_by_id(id) {
            Ok(Some(job)) if job.is_finished() => {
                registry.retire(id);
                debug!("Retired cancellation channel of job {} ({})", id, job.status);
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                registry.retire(id);
                warn!("Job {} vanished from the store, retired its channel", id);
            }
            Err(e) => warn!("Watcher failed to load job {}: {}", id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::db::{job_repo, transaction_repo};
    use crate::settlement::{Transaction, TransactionStatus};

    fn test_config(dir: &tempfile::TempDir) -> Config {
        Config {
            worker_count: 1,
            watch_interval_ms: 10,
            page_size: 2,
            export_directory: dir.path().to_string_lossy().into_owned(),
            ..Config::default()
        }
    }

    fn paid(merchant: &str, amount: i64, fee: i64, day: u32) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            merchant_id: merchant.to_string(),
            amount_cents: amount,
            fee_cents: fee,
            status: TransactionStatus::Paid,
            paid_at: Utc.with_ymd_and_hms(2025, 1, day, 10, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_create_returns_queued_job_with_total() {
        let db = Database::open_in_memory().unwrap();
        transaction_repo::insert(&db, &[paid("M1", 100, 3, 5), paid("M1", 50, 1, 5)]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let coordinator = JobCoordinator::with_database(db, &test_config(&dir)).unwrap();

        let job = coordinator
            .create_settlement_job("2025-01-01", "2025-01-31")
            .unwrap();

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.total, 2);
        assert!(!job.id.is_nil());
        assert_eq!(job.params, r#"{"from":"2025-01-01","to":"2025-01-31"}"#);
        assert_eq!(coordinator.get_job(job.id).unwrap().status, JobStatus::Queued);
        assert_eq!(coordinator.active_cancellations(), 1);
    }

    #[test]
    fn test_invalid_range_persists_nothing() {
        let db = Database::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let coordinator = JobCoordinator::with_database(db.clone(), &test_config(&dir)).unwrap();

        for (from, to) in [
            ("2025-02-01", "2025-01-01"),
            ("2025-01-01", "not-a-date"),
            ("", "2025-01-01"),
        ] {
            assert!(matches!(
                coordinator.create_settlement_job(from, to),
                Err(JobError::InvalidDateRange { .. })
            ));
        }
        assert!(job_repo::list_recent(&db, 10).unwrap().is_empty());
        assert_eq!(coordinator.active_cancellations(), 0);
    }

    #[test]
    fn test_get_unknown_job() {
        let db = Database::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let coordinator = JobCoordinator::with_database(db, &test_config(&dir)).unwrap();

        let id = Uuid::new_v4();
        assert!(matches!(coordinator.get_job(id), Err(JobError::JobNotFound(x)) if x == id));
        assert!(matches!(coordinator.cancel_job(id), Err(JobError::JobNotFound(_))));
    }

    #[test]
    fn test_cancel_queued_job() {
        let db = Database::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let coordinator = JobCoordinator::with_database(db, &test_config(&dir)).unwrap();
        let mut events = coordinator.subscribe();

        let job = coordinator
            .create_settlement_job("2025-01-01", "2025-01-31")
            .unwrap();
        let cancelled = coordinator.cancel_job(job.id).unwrap();

        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(cancelled.cancelled);
        assert!(cancelled.completed_at.is_some());
        assert!(cancelled.error_message.is_none());
        assert_eq!(coordinator.active_cancellations(), 0);

        assert_eq!(events.try_recv().unwrap().status, JobStatus::Queued);
        assert_eq!(events.try_recv().unwrap().status, JobStatus::Cancelled);

        assert!(matches!(
            coordinator.cancel_job(job.id),
            Err(JobError::JobCannotBeCancelled {
                status: JobStatus::Cancelled,
                ..
            })
        ));
    }

    #[test]
    fn test_watcher_retires_finished_jobs() {
        let db = Database::open_in_memory().unwrap();
        transaction_repo::insert(&db, &[paid("M1", 100, 3, 5)]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let coordinator = JobCoordinator::with_database(db, &test_config(&dir)).unwrap();
        coordinator.start_worker_pool().unwrap();

        let job = coordinator
            .create_settlement_job("2025-01-01", "2025-01-31")
            .unwrap();

        let mut retired = false;
        for _ in 0..500 {
            if coordinator.active_cancellations() == 0 {
                retired = true;
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(retired);
        assert_eq!(coordinator.get_job(job.id).unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn test_create_after_shutdown_fails() {
        let db = Database::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let coordinator = JobCoordinator::with_database(db, &test_config(&dir)).unwrap();
        coordinator.shutdown();
        coordinator.shutdown();

        assert!(matches!(
            coordinator.create_settlement_job("2025-01-01", "2025-01-31"),
            Err(JobError::Worker(WorkerError::ChannelClosed))
        ));
    }

    #[test]
    fn test_job_waiting_for_queue_room_fails_on_shutdown() {
        let db = Database::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            queue_capacity: 1,
            ..test_config(&dir)
        };
        let coordinator = JobCoordinator::with_database(db, &config).unwrap();
        let mut events = coordinator.subscribe();

        let queued = coordinator
            .create_settlement_job("2025-01-01", "2025-01-31")
            .unwrap();
        let waiting = coordinator
            .create_settlement_job("2025-02-01", "2025-02-28")
            .unwrap();
        coordinator.shutdown();

        let failed = coordinator.get_job(waiting.id).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed
            .error_message
            .as_deref()
            .unwrap()
            .contains("could not be queued"));
        assert!(failed.completed_at.is_some());
        assert!(!failed.cancelled);
        assert_eq!(coordinator.get_job(queued.id).unwrap().status, JobStatus::Queued);

        let statuses: Vec<JobStatus> = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| e.job_id == waiting.id)
            .map(|e| e.status)
            .collect();
        assert_eq!(statuses, vec![JobStatus::Queued, JobStatus::Failed]);
    }
}
