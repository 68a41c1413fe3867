use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::settlement::export::DEFAULT_EXPORT_DIR;
use crate::worker::pool::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKER_COUNT};
use crate::worker::processor::DEFAULT_PAGE_SIZE;

/// Runtime configuration. Every field has a default, so `{}` is a valid file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub worker_count: usize,
    pub queue_capacity: usize,
    /// Transactions fetched per page.
    pub page_size: u64,
    /// Carried on each job descriptor; informational only.
    pub descriptor_batch_size: usize,
    /// Interval of the coordinator's terminal-status watcher.
    pub watch_interval_ms: u64,
    pub export_directory: String,
    /// Falls back to `~/.settlr/data/settlr.db` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            page_size: DEFAULT_PAGE_SIZE,
            descriptor_batch_size: 100,
            watch_interval_ms: 5_000,
            export_directory: DEFAULT_EXPORT_DIR.to_string(),
            database_path: None,
        }
    }
}

impl Config {
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path
            .as_ref()
            .map(PathBuf::from)
            .or_else(crate::db::default_database_path)
    }

    pub fn watch_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.watch_interval_ms)
    }
}
