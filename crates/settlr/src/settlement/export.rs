//! CSV export of settlement rows.

use std::path::{Path, PathBuf};

use serde::Serialize;
use uuid::Uuid;

use super::Settlement;
use crate::error::ExportError;
use crate::job::{Job, JobStatus, DATE_FORMAT};

/// Directory used when no export directory is configured.
pub const DEFAULT_EXPORT_DIR: &str = "tmp/settlements";

/// Public prefix under which exported files are served.
pub const DOWNLOAD_PREFIX: &str = "/downloads/";

/// One CSV line: `merchant_id,date,gross,fee,net,txn_count`.
#[derive(Debug, Serialize)]
struct CsvRecord<'a> {
    merchant_id: &'a str,
    date: String,
    gross: i64,
    fee: i64,
    net: i64,
    txn_count: u64,
}

impl<'a> From<&'a Settlement> for CsvRecord<'a> {
    fn from(s: &'a Settlement) -> Self {
        Self {
            merchant_id: &s.merchant_id,
            date: s.date.format(DATE_FORMAT).to_string(),
            gross: s.gross_cents,
            fee: s.fee_cents,
            net: s.net_cents,
            txn_count: s.txn_count,
        }
    }
}

/// Writes one CSV file per job into a fixed directory.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    directory: PathBuf,
}

impl CsvExporter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Deterministic artifact path for a job: `<directory>/<job_id>.csv`.
    pub fn path_for(&self, job_id: Uuid) -> PathBuf {
        self.directory.join(format!("{}.csv", job_id))
    }

    /// Renders `rows` to the job's CSV file, replacing any previous file.
    /// Row order follows the slice and carries no meaning.
    pub fn export(&self, job_id: Uuid, rows: &[Settlement]) -> Result<PathBuf, ExportError> {
        std::fs::create_dir_all(&self.directory).map_err(|e| ExportError::CreateDirectory {
            path: self.directory.clone(),
            source: e,
        })?;

        let path = self.path_for(job_id);
        let write_err = |e: csv::Error| ExportError::WriteCsv {
            path: path.clone(),
            source: e,
        };

        // Header is written by hand so an empty export still carries it.
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&path)
            .map_err(write_err)?;
        writer
            .write_record(["merchant_id", "date", "gross", "fee", "net", "txn_count"])
            .map_err(write_err)?;
        for row in rows {
            writer.serialize(CsvRecord::from(row)).map_err(write_err)?;
        }
        writer.flush().map_err(|e| ExportError::Flush {
            path: path.clone(),
            source: e,
        })?;

        log::debug!("Wrote {} settlement rows to {}", rows.len(), path.display());
        Ok(path)
    }
}

impl Default for CsvExporter {
    fn default() -> Self {
        Self::new(DEFAULT_EXPORT_DIR)
    }
}

/// Public download name for a result path: the file name without directory or extension.
pub fn download_name(result_path: &str) -> Option<String> {
    Path::new(result_path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
}

/// Download URL for a completed job, `None` for any other job.
pub fn download_url(job: &Job) -> Option<String> {
    if job.status != JobStatus::Completed {
        return None;
    }
    let name = download_name(job.result_path.as_deref()?)?;
    Some(format!("{}{}.csv", DOWNLOAD_PREFIX, name))
}
