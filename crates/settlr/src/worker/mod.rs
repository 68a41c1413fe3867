pub mod cancel;
pub mod pool;
pub mod processor;

pub use cancel::{CancelRegistry, CancelSignal};
pub use pool::{JobSubmitter, WorkerPool};
pub use processor::{JobOutcome, SettlementProcessor};

// Re-export crossbeam_channel for callers matching on submit errors
pub use crossbeam_channel;
