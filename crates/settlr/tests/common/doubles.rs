//! Port doubles for driving cancellation and failure paths.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use uuid::Uuid;

use settlr::ports::StoreResult;
use settlr::{
    Database, DateRange, Job, JobStatus, JobStore, Settlement, SettlementSink, StoreError,
    Transaction, TransactionSource,
};

/// Delegates to a database but parks every page fetch until released.
///
/// Each fetch first reports its offset on `entered`, then waits for a
/// message (or a closed channel) on the release side.
pub struct GatedSource {
    inner: Database,
    entered: Sender<u64>,
    release: Receiver<()>,
}

/// Test-side handles of a gated double. `entered` reports where the double
/// parked: a page offset for [`GatedSource`], a job ID for [`ScriptedStore`].
pub struct Gate<T = u64> {
    pub entered: Receiver<T>,
    pub release: Sender<()>,
}

impl GatedSource {
    pub fn new(inner: Database) -> (Self, Gate) {
        let (entered_tx, entered_rx) = bounded(64);
        let (release_tx, release_rx) = bounded(64);
        (
            Self {
                inner,
                entered: entered_tx,
                release: release_rx,
            },
            Gate {
                entered: entered_rx,
                release: release_tx,
            },
        )
    }
}

impl TransactionSource for GatedSource {
    fn count(&self, range: &DateRange) -> StoreResult<u64> {
        self.inner.count(range)
    }

    fn get_page(&self, range: &DateRange, offset: u64, limit: u64) -> StoreResult<Vec<Transaction>> {
        let _ = self.entered.send(offset);
        let _ = self.release.recv();
        self.inner.get_page(range, offset, limit)
    }
}

/// Counts succeed; page fetches fail once `fail_from_offset` is reached.
pub struct FailingSource {
    inner: Database,
    fail_from_offset: u64,
    fail_count: bool,
}

impl FailingSource {
    pub fn on_page(inner: Database, fail_from_offset: u64) -> Self {
        Self {
            inner,
            fail_from_offset,
            fail_count: false,
        }
    }

    pub fn on_count(inner: Database) -> Self {
        Self {
            inner,
            fail_from_offset: 0,
            fail_count: true,
        }
    }
}

impl TransactionSource for FailingSource {
    fn count(&self, range: &DateRange) -> StoreResult<u64> {
        if self.fail_count {
            return Err(StoreError::Unavailable("count unavailable".to_string()));
        }
        self.inner.count(range)
    }

    fn get_page(&self, range: &DateRange, offset: u64, limit: u64) -> StoreResult<Vec<Transaction>> {
        if offset >= self.fail_from_offset {
            return Err(StoreError::Unavailable("replica lost".to_string()));
        }
        self.inner.get_page(range, offset, limit)
    }
}

/// A sink that always fails and remembers how often it was called.
#[derive(Default)]
pub struct FailingSink {
    pub calls: AtomicU64,
}

impl SettlementSink for FailingSink {
    fn upsert_batch(&self, _rows: &[Settlement]) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("sink unavailable".to_string()))
    }
}

/// Job store over a database that can interleave a competing writer.
///
/// - `park_after_create`: every `create` persists the job, reports its ID
///   on the gate and waits to be released before returning.
/// - `start_on_next_read`: the next `get_by_id` of a QUEUED job returns the
///   QUEUED snapshot but moves the stored row to RUNNING first, as a worker
///   picking it up in between would.
pub struct ScriptedStore {
    inner: Database,
    start_on_next_read: AtomicBool,
    parked: Option<(Sender<Uuid>, Receiver<()>)>,
}

impl ScriptedStore {
    pub fn new(inner: Database) -> Self {
        Self {
            inner,
            start_on_next_read: AtomicBool::new(false),
            parked: None,
        }
    }

    pub fn park_after_create(inner: Database) -> (Self, Gate<Uuid>) {
        let (entered_tx, entered_rx) = bounded(64);
        let (release_tx, release_rx) = bounded(64);
        let store = Self {
            parked: Some((entered_tx, release_rx)),
            ..Self::new(inner)
        };
        (
            store,
            Gate {
                entered: entered_rx,
                release: release_tx,
            },
        )
    }

    pub fn start_on_next_read(&self) {
        self.start_on_next_read.store(true, Ordering::SeqCst);
    }
}

impl JobStore for ScriptedStore {
    fn create(&self, job: &Job) -> StoreResult<Uuid> {
        let id = self.inner.create(job)?;
        if let Some((entered, release)) = &self.parked {
            let _ = entered.send(id);
            let _ = release.recv();
        }
        Ok(id)
    }

    fn get_by_id(&self, id: Uuid) -> StoreResult<Option<Job>> {
        let job = self.inner.get_by_id(id)?;
        let queued = matches!(&job, Some(j) if j.status == JobStatus::Queued);
        if queued && self.start_on_next_read.swap(false, Ordering::SeqCst) {
            self.inner.update_status(id, JobStatus::Running, None)?;
        }
        Ok(job)
    }

    fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> StoreResult<()> {
        self.inner.update_status(id, status, error_message)
    }

    fn update_started_at(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        self.inner.update_started_at(id, at)
    }

    fn update_completed_at(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        self.inner.update_completed_at(id, at)
    }

    fn update_progress(&self, id: Uuid, progress: u8, processed: u64) -> StoreResult<()> {
        self.inner.update_progress(id, progress, processed)
    }

    fn complete(&self, id: Uuid, result_path: &str, completed_at: DateTime<Utc>) -> StoreResult<()> {
        self.inner.complete(id, result_path, completed_at)
    }

    fn update_cancelled_flag(&self, id: Uuid, cancelled: bool) -> StoreResult<()> {
        self.inner.update_cancelled_flag(id, cancelled)
    }

    fn cancel_queued(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        self.inner.cancel_queued(id, at)
    }

    fn fail_queued(&self, id: Uuid, error_message: &str, at: DateTime<Utc>) -> StoreResult<()> {
        self.inner.fail_queued(id, error_message, at)
    }
}
