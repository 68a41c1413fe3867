//! Job repository: CRUD and status transitions for the `jobs` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::error::StoreError;
use crate::job::{Job, JobStatus, JobType};
use crate::ports::{JobStore, StoreResult};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub job_type: String,
    pub status: String,
    pub progress: i64,
    pub processed: i64,
    pub total: i64,
    pub params: String,
    pub result_path: Option<String>,
    pub error_message: Option<String>,
    pub unique_run_id: Option<String>,
    pub cancelled: bool,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_type: row.get("job_type")?,
            status: row.get("status")?,
            progress: row.get("progress")?,
            processed: row.get("processed")?,
            total: row.get("total")?,
            params: row.get("params")?,
            result_path: row.get("result_path")?,
            error_message: row.get("error_message")?,
            unique_run_id: row.get("unique_run_id")?,
            cancelled: row.get("cancelled")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn from_job(id: Uuid, job: &Job, now: &str) -> Self {
        Self {
            id: id.to_string(),
            job_type: job.job_type.as_str().to_string(),
            status: job.status.as_str().to_string(),
            progress: i64::from(job.progress),
            processed: job.processed as i64,
            total: job.total as i64,
            params: job.params.clone(),
            result_path: job.result_path.clone(),
            error_message: job.error_message.clone(),
            unique_run_id: job.unique_run_id.clone(),
            cancelled: job.cancelled,
            started_at: job.started_at.map(format_timestamp),
            completed_at: job.completed_at.map(format_timestamp),
            created_at: now.to_string(),
            updated_at: now.to_string(),
        }
    }

    /// Decodes the raw row into a domain [`Job`].
    pub fn into_job(self) -> Result<Job, DatabaseError> {
        let corrupt = |column: &'static str, reason: String| DatabaseError::Decode { column, reason };

        Ok(Job {
            id: Uuid::parse_str(&self.id).map_err(|e| corrupt("id", e.to_string()))?,
            job_type: self.job_type.parse::<JobType>().map_err(|e| corrupt("job_type", e))?,
            status: self.status.parse::<JobStatus>().map_err(|e| corrupt("status", e))?,
            progress: self.progress.clamp(0, 100) as u8,
            processed: self.processed.max(0) as u64,
            total: self.total.max(0) as u64,
            params: self.params,
            result_path: self.result_path,
            error_message: self.error_message,
            unique_run_id: self.unique_run_id,
            cancelled: self.cancelled,
            started_at: self
                .started_at
                .as_deref()
                .map(|s| parse_timestamp(s, "started_at"))
                .transpose()?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(|s| parse_timestamp(s, "completed_at"))
                .transpose()?,
        })
    }
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, job_type, status, progress, processed, total, params,
             result_path, error_message, unique_run_id, cancelled, started_at, completed_at,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                job.id,
                job.job_type,
                job.status,
                job.progress,
                job.processed,
                job.total,
                job.params,
                job.result_path,
                job.error_message,
                job.unique_run_id,
                job.cancelled,
                job.started_at,
                job.completed_at,
                job.created_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Most recently created jobs first.
pub fn list_recent(db: &Database, limit: u64) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM jobs ORDER BY created_at DESC, id LIMIT ?1")?;
        let rows = stmt
            .query_map(params![limit as i64], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Moves a job to `status` only if its current status is one of `status`'s
/// legal predecessors. Returns the number of rows changed (0 or 1).
pub fn transition_status(
    db: &Database,
    id: &str,
    status: JobStatus,
    error_message: Option<&str>,
    updated_at: &str,
) -> Result<usize, DatabaseError> {
    let predecessors = status.predecessors();
    if predecessors.is_empty() {
        return Ok(0);
    }
    let allowed = predecessors
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ");

    db.with_conn(|conn| {
        let changed = conn.execute(
            &format!(
                "UPDATE jobs SET status = ?2, error_message = COALESCE(?3, error_message),
                 updated_at = ?4 WHERE id = ?1 AND status IN ({})",
                allowed
            ),
            params![id, status.as_str(), error_message, updated_at],
        )?;
        Ok(changed)
    })
}

/// Updates a single nullable/integer column. Returns rows changed.
fn update_column(
    db: &Database,
    id: &str,
    assignments: &str,
    value: &dyn rusqlite::types::ToSql,
    updated_at: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            &format!("UPDATE jobs SET {}, updated_at = ?3 WHERE id = ?1", assignments),
            params![id, value, updated_at],
        )?;
        Ok(changed)
    })
}

/// RUNNING -> COMPLETED in one statement. Returns rows changed.
pub fn complete(
    db: &Database,
    id: &str,
    result_path: &str,
    completed_at: &str,
    updated_at: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'COMPLETED', result_path = ?2, completed_at = ?3,
             progress = 100, processed = total, updated_at = ?4
             WHERE id = ?1 AND status = 'RUNNING'",
            params![id, result_path, completed_at, updated_at],
        )?;
        Ok(changed)
    })
}

/// Finalizes a job that no worker has picked up. Applies only while the
/// stored status is still QUEUED. Returns rows changed.
pub fn finish_queued(
    db: &Database,
    id: &str,
    status: JobStatus,
    error_message: Option<&str>,
    cancelled: bool,
    completed_at: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = ?2, error_message = COALESCE(?3, error_message),
             cancelled = ?4, completed_at = ?5, updated_at = ?5
             WHERE id = ?1 AND status = 'QUEUED'",
            params![id, status.as_str(), error_message, cancelled, completed_at],
        )?;
        Ok(changed)
    })
}

fn now() -> String {
    format_timestamp(Utc::now())
}

impl Database {
    /// Maps "no row changed" to not-found or an illegal transition.
    fn explain_unchanged(&self, id: Uuid, to: JobStatus) -> StoreError {
        match find_by_id(self, &id.to_string()) {
            Ok(Some(row)) => match row.status.parse::<JobStatus>() {
                Ok(from) => StoreError::IllegalTransition { id, from, to },
                Err(reason) => StoreError::Database(DatabaseError::Decode {
                    column: "status",
                    reason,
                }),
            },
            Ok(None) => StoreError::JobNotFound(id),
            Err(e) => StoreError::Database(e),
        }
    }

    fn expect_one(&self, id: Uuid, changed: usize) -> StoreResult<()> {
        if changed == 0 {
            Err(StoreError::JobNotFound(id))
        } else {
            Ok(())
        }
    }
}

impl JobStore for Database {
    fn create(&self, job: &Job) -> StoreResult<Uuid> {
        let id = Uuid::new_v4();
        insert(self, &JobRow::from_job(id, job, &now()))?;
        Ok(id)
    }

    fn get_by_id(&self, id: Uuid) -> StoreResult<Option<Job>> {
        match find_by_id(self, &id.to_string())? {
            Some(row) => Ok(Some(row.into_job()?)),
            None => Ok(None),
        }
    }

    fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> StoreResult<()> {
        let changed = transition_status(self, &id.to_string(), status, error_message, &now())?;
        if changed == 0 {
            return Err(self.explain_unchanged(id, status));
        }
        Ok(())
    }

    fn update_started_at(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let changed = update_column(
            self,
            &id.to_string(),
            "started_at = ?2",
            &format_timestamp(at),
            &now(),
        )?;
        self.expect_one(id, changed)
    }

    fn update_completed_at(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let changed = update_column(
            self,
            &id.to_string(),
            "completed_at = ?2",
            &format_timestamp(at),
            &now(),
        )?;
        self.expect_one(id, changed)
    }

    fn update_progress(&self, id: Uuid, progress: u8, processed: u64) -> StoreResult<()> {
        // Stored `processed` never exceeds the stored total.
        let changed = self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE jobs SET progress = ?2, processed = MIN(?3, total), updated_at = ?4
                 WHERE id = ?1",
                params![id.to_string(), i64::from(progress.min(100)), processed as i64, now()],
            )?;
            Ok(changed)
        })?;
        self.expect_one(id, changed)
    }

    fn complete(
        &self,
        id: Uuid,
        result_path: &str,
        completed_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let changed = complete(
            self,
            &id.to_string(),
            result_path,
            &format_timestamp(completed_at),
            &now(),
        )?;
        if changed == 0 {
            return Err(self.explain_unchanged(id, JobStatus::Completed));
        }
        Ok(())
    }

    fn update_cancelled_flag(&self, id: Uuid, cancelled: bool) -> StoreResult<()> {
        let changed = update_column(self, &id.to_string(), "cancelled = ?2", &cancelled, &now())?;
        self.expect_one(id, changed)
    }

    fn cancel_queued(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let changed = finish_queued(
            self,
            &id.to_string(),
            JobStatus::Cancelled,
            None,
            true,
            &format_timestamp(at),
        )?;
        if changed == 0 {
            return Err(self.explain_unchanged(id, JobStatus::Cancelled));
        }
        Ok(())
    }

    fn fail_queued(&self, id: Uuid, error_message: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let changed = finish_queued(
            self,
            &id.to_string(),
            JobStatus::Failed,
            Some(error_message),
            false,
            &format_timestamp(at),
        )?;
        if changed == 0 {
            return Err(self.explain_unchanged(id, JobStatus::Failed));
        }
        Ok(())
    }
}
