//! Test harness for isolated coordinator runs.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tempfile::TempDir;
use uuid::Uuid;

use settlr::db::transaction_repo;
use settlr::ports::{JobStoreRef, SettlementSinkRef, TransactionSourceRef};
use settlr::{Config, Database, Job, JobCoordinator, Transaction};

/// In-memory database plus a temporary export directory.
pub struct TestHarness {
    temp_dir: TempDir,
    pub db: Database,
    pub export_dir: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let export_dir = temp_dir.path().join("settlements");
        Self {
            db: Database::open_in_memory().expect("Failed to open test database"),
            export_dir,
            temp_dir,
        }
    }

    pub fn root(&self) -> &std::path::Path {
        self.temp_dir.path()
    }

    /// Small pages and a fast watcher so tests finish quickly.
    pub fn config(&self) -> Config {
        Config {
            worker_count: 2,
            page_size: 2,
            watch_interval_ms: 20,
            export_directory: self.export_dir.to_string_lossy().into_owned(),
            ..Config::default()
        }
    }

    pub fn insert(&self, txns: &[Transaction]) {
        transaction_repo::insert(&self.db, txns).expect("Failed to insert transactions");
    }

    /// Coordinator with the database behind all three ports.
    pub fn coordinator(&self) -> JobCoordinator {
        JobCoordinator::with_database(self.db.clone(), &self.config())
            .expect("Failed to build coordinator")
    }

    /// Coordinator with the given source and sink; jobs stay in the database.
    pub fn coordinator_with(
        &self,
        source: TransactionSourceRef,
        sink: SettlementSinkRef,
        config: &Config,
    ) -> JobCoordinator {
        JobCoordinator::new(Arc::new(self.db.clone()), source, sink, config)
            .expect("Failed to build coordinator")
    }

    /// Coordinator with the given job store; transactions and settlements
    /// stay in the database.
    pub fn coordinator_with_store(&self, jobs: JobStoreRef, config: &Config) -> JobCoordinator {
        let db = Arc::new(self.db.clone());
        JobCoordinator::new(jobs, db.clone(), db, config).expect("Failed to build coordinator")
    }

    /// Polls until the job reaches a terminal status.
    pub fn wait_for_terminal(&self, coordinator: &JobCoordinator, id: Uuid) -> Job {
        for _ in 0..1_000 {
            let job = coordinator.get_job(id).expect("job exists");
            if job.is_finished() {
                return job;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("job {} did not finish in time", id);
    }

    /// Polls until `check` holds, failing the test after ~10s.
    pub fn eventually(&self, mut check: impl FnMut() -> bool) {
        for _ in 0..1_000 {
            if check() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("condition not reached in time");
    }
}
