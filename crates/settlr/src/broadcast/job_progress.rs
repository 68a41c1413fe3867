//! Job progress broadcaster for real-time job status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::job::JobStatus;

/// Progress event for a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: Uuid,
    pub status: JobStatus,
    /// Percentage in `[0, 100]`.
    pub progress: u8,
    pub processed: u64,
    pub total: u64,
    /// Human-readable message describing current activity.
    pub message: String,
    /// CSV path (set on completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl JobProgressEvent {
    /// Creates a new progress event.
    pub fn new(job_id: Uuid, status: JobStatus, message: &str) -> Self {
        Self {
            job_id,
            status,
            progress: 0,
            processed: 0,
            total: 0,
            message: message.to_string(),
            result_path: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Sets the counters carried by the event.
    pub fn with_counts(mut self, processed: u64, total: u64, progress: u8) -> Self {
        self.processed = processed;
        self.total = total;
        self.progress = progress.min(100);
        self
    }

    /// Creates a completion event.
    pub fn completed(job_id: Uuid, total: u64, result_path: &str) -> Self {
        let mut event = Self::new(job_id, JobStatus::Completed, "Settlement completed")
            .with_counts(total, total, 100);
        event.result_path = Some(result_path.to_string());
        event
    }

    /// Creates a failure event.
    pub fn failed(job_id: Uuid, error: &str) -> Self {
        let mut event = Self::new(job_id, JobStatus::Failed, "Settlement failed");
        event.error = Some(error.to_string());
        event
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine.
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// Creates a tracker scoped to one job.
    pub fn track(&self, job_id: Uuid) -> JobProgressTracker {
        JobProgressTracker::new(job_id, Arc::clone(&self.sender))
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Tracks progress for a single job.
pub struct JobProgressTracker {
    job_id: Uuid,
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressTracker {
    pub fn new(job_id: Uuid, sender: Arc<broadcast::Sender<JobProgressEvent>>) -> Self {
        Self { job_id, sender }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Announces a status change.
    pub fn status(&self, status: JobStatus, message: &str) {
        let _ = self
            .sender
            .send(JobProgressEvent::new(self.job_id, status, message));
    }

    /// Announces a processed page of a running job.
    pub fn page(&self, processed: u64, total: u64, progress: u8) {
        let event = JobProgressEvent::new(
            self.job_id,
            JobStatus::Running,
            &format!("Processed {}/{} transactions", processed, total),
        )
        .with_counts(processed, total, progress);
        let _ = self.sender.send(event);
    }

    /// Marks the job as completed with the CSV path.
    pub fn completed(&self, total: u64, result_path: &str) {
        let _ = self
            .sender
            .send(JobProgressEvent::completed(self.job_id, total, result_path));
    }

    /// Marks the job as cancelled at the given counters.
    pub fn cancelled(&self, processed: u64, total: u64, progress: u8) {
        let event = JobProgressEvent::new(self.job_id, JobStatus::Cancelled, "Settlement cancelled")
            .with_counts(processed, total, progress);
        let _ = self.sender.send(event);
    }

    /// Marks the job as failed with an error message.
    pub fn failed(&self, error: &str) {
        let _ = self
            .sender
            .send(JobProgressEvent::failed(self.job_id, error));
    }
}
