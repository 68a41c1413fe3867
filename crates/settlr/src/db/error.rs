//! Failures of the SQLite-backed store.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("cannot create database directory {}: {source}", .path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The step rolled back; the schema stays at the previous version.
    #[error("migration {version} ({name}) rolled back: {source}")]
    Migration {
        version: u32,
        name: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// A thread panicked while holding the connection.
    #[error("database connection poisoned by a panicked holder")]
    ConnectionPoisoned,

    /// A stored value does not decode into its domain type.
    #[error("cannot decode column {column}: {reason}")]
    Decode { column: &'static str, reason: String },
}
