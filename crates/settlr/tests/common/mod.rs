//! Shared test utilities for settlr integration tests.
//!
//! - `TestHarness`: in-memory database, temp export directory, coordinator setup
//! - builders for transactions
//! - port doubles that block or fail on demand

pub mod builders;
pub mod doubles;
pub mod harness;

pub use builders::*;
pub use doubles::*;
pub use harness::TestHarness;
