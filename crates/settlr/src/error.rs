use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::job::JobStatus;

#[derive(Error, Debug)]
pub enum SettlrError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

/// Errors surfaced by the job coordinator to its callers.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("invalid date range: from '{from}' to '{to}'")]
    InvalidDateRange { from: String, to: String },

    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    #[error("job {id} cannot be cancelled in status {status}")]
    JobCannotBeCancelled { id: Uuid, status: JobStatus },

    #[error("failed to serialize job parameters: {0}")]
    Params(#[from] serde_json::Error),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::JobNotFound(id) => JobError::JobNotFound(id),
            other => JobError::Store(other),
        }
    }
}

/// Errors returned by the persistence ports (transaction source, settlement sink, job store).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] crate::db::DatabaseError),

    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    #[error("illegal status transition for job {id}: {from} -> {to}")]
    IllegalTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write CSV file '{path}': {source}")]
    WriteCsv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to flush CSV file '{path}': {source}")]
    Flush {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker thread: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("Worker pool already started")]
    AlreadyStarted,

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, SettlrError>;
