//! Job records, the job status state machine and the queued job descriptor.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::worker::cancel::CancelSignal;

/// Date format accepted for settlement ranges and rendered in exports.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Kind of background job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Settlement,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Settlement => "SETTLEMENT",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SETTLEMENT" => Ok(JobType::Settlement),
            other => Err(format!("unknown job type '{}'", other)),
        }
    }
}

/// Status of a job.
///
/// `QUEUED -> RUNNING -> {COMPLETED | FAILED | CANCELLED}`, plus
/// `QUEUED -> CANCELLED` for jobs cancelled before a worker picked them up
/// and `QUEUED -> FAILED` for jobs whose descriptor never reached the queue.
/// The three right-hand states are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether a cancellation request is accepted in this status.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }

    /// Statuses from which `self` may be entered.
    pub fn predecessors(&self) -> &'static [JobStatus] {
        match self {
            JobStatus::Queued => &[],
            JobStatus::Running => &[JobStatus::Queued],
            JobStatus::Completed => &[JobStatus::Running],
            JobStatus::Failed | JobStatus::Cancelled => &[JobStatus::Queued, JobStatus::Running],
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        next.predecessors().contains(self)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(JobStatus::Queued),
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// A persisted job record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Assigned by the job store on creation; nil until then.
    pub id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    /// Percentage in `[0, 100]`.
    pub progress: u8,
    pub processed: u64,
    pub total: u64,
    /// Serialized [`SettlementParams`].
    pub params: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_run_id: Option<String>,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A fresh QUEUED settlement job, not yet persisted.
    pub fn new_settlement(params: String, total: u64, run_id: String) -> Self {
        Self {
            id: Uuid::nil(),
            job_type: JobType::Settlement,
            status: JobStatus::Queued,
            progress: 0,
            processed: 0,
            total,
            params,
            result_path: None,
            error_message: None,
            unique_run_id: Some(run_id),
            cancelled: false,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// The opaque parameter blob of a settlement job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettlementParams {
    pub from: String,
    pub to: String,
}

/// An inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    /// Parses two `YYYY-MM-DD` dates. Returns `None` when either is
    /// unparsable or `from > to`.
    pub fn parse(from: &str, to: &str) -> Option<Self> {
        let from = parse_day(from)?;
        let to = parse_day(to)?;
        if from > to {
            return None;
        }
        Some(Self { from, to })
    }

    /// Start of the first day, inclusive.
    pub fn start(&self) -> DateTime<Utc> {
        self.from.and_time(chrono::NaiveTime::MIN).and_utc()
    }

    /// Start of the day after the last day, exclusive.
    pub fn end_exclusive(&self) -> DateTime<Utc> {
        let next = self.to.succ_opt().unwrap_or(NaiveDate::MAX);
        next.and_time(chrono::NaiveTime::MIN).and_utc()
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start() && at < self.end_exclusive()
    }

    pub fn to_params(&self) -> SettlementParams {
        SettlementParams {
            from: self.from.format(DATE_FORMAT).to_string(),
            to: self.to.format(DATE_FORMAT).to_string(),
        }
    }
}

/// Exactly `YYYY-MM-DD`: no padding, no sign, four-digit year.
fn parse_day(s: &str) -> Option<NaiveDate> {
    let bytes = s.as_bytes();
    let shaped = bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !shaped {
        return None;
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}

/// Descriptor handed to the worker pool for one settlement job.
#[derive(Debug)]
pub struct SettlementJob {
    pub id: Uuid,
    pub range: DateRange,
    pub run_id: String,
    pub batch_size: usize,
    pub cancel: CancelSignal,
}
