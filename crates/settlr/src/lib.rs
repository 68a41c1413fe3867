pub mod broadcast;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod job;
pub mod logging;
pub mod ports;
pub mod settlement;
pub mod worker;

pub use broadcast::{JobProgressBroadcaster, JobProgressEvent};
pub use config::{load_config, Config};
pub use coordinator::JobCoordinator;
pub use db::Database;
pub use error::{
    ConfigError, ExportError, JobError, Result, SettlrError, StoreError, WorkerError,
};
pub use job::{DateRange, Job, JobStatus, JobType};
pub use ports::{JobStore, SettlementSink, TransactionSource};
pub use settlement::{Settlement, Transaction, TransactionStatus};
