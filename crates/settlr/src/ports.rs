//! Persistence interfaces consumed by the coordinator and the worker pool.
//!
//! [`crate::db::Database`] implements all three against SQLite; tests swap in
//! doubles to exercise failure and cancellation paths.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::job::{DateRange, Job, JobStatus};
use crate::settlement::{Settlement, Transaction};

pub type StoreResult<T> = Result<T, StoreError>;

/// Paginated read access to eligible (PAID, in-range) transactions.
pub trait TransactionSource: Send + Sync {
    /// Number of eligible transactions in `range`.
    fn count(&self, range: &DateRange) -> StoreResult<u64>;

    /// One page of eligible transactions ordered by `(paid_at, id)`.
    fn get_page(&self, range: &DateRange, offset: u64, limit: u64)
        -> StoreResult<Vec<Transaction>>;
}

/// Idempotent upsert of settlement rows keyed by (merchant, date).
pub trait SettlementSink: Send + Sync {
    /// Later writes for the same key overwrite earlier ones. Empty input is a no-op.
    fn upsert_batch(&self, rows: &[Settlement]) -> StoreResult<()>;
}

/// Durable job records. Status updates only apply along legal transitions.
pub trait JobStore: Send + Sync {
    /// Persists a new job and returns its generated ID.
    fn create(&self, job: &Job) -> StoreResult<Uuid>;

    fn get_by_id(&self, id: Uuid) -> StoreResult<Option<Job>>;

    /// Moves the job to `status`, recording `error_message` when given.
    ///
    /// Fails with [`StoreError::IllegalTransition`] when the current status
    /// cannot move to `status`, and [`StoreError::JobNotFound`] when absent.
    fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> StoreResult<()>;

    fn update_started_at(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    fn update_completed_at(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    fn update_progress(&self, id: Uuid, progress: u8, processed: u64) -> StoreResult<()>;

    /// RUNNING -> COMPLETED with the artifact path, progress pinned to 100
    /// and processed set to the total.
    fn complete(&self, id: Uuid, result_path: &str, completed_at: DateTime<Utc>)
        -> StoreResult<()>;

    fn update_cancelled_flag(&self, id: Uuid, cancelled: bool) -> StoreResult<()>;

    /// QUEUED -> CANCELLED with the cancelled flag and completion time, in
    /// one step. A job that has already left QUEUED yields
    /// [`StoreError::IllegalTransition`] and is left untouched.
    fn cancel_queued(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    /// QUEUED -> FAILED for a job whose descriptor never reached the queue.
    fn fail_queued(&self, id: Uuid, error_message: &str, at: DateTime<Utc>) -> StoreResult<()>;
}

pub type TransactionSourceRef = Arc<dyn TransactionSource>;
pub type SettlementSinkRef = Arc<dyn SettlementSink>;
pub type JobStoreRef = Arc<dyn JobStore>;
