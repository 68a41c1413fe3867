//! Versioned schema migrations recorded in `_migrations`.

use rusqlite::Connection;

use super::error::DatabaseError;

/// One schema step. `version` is strictly increasing across [`MIGRATIONS`].
struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_jobs_table",
        sql: include_str!("sql/001_create_jobs.sql"),
    },
    Migration {
        version: 2,
        name: "create_transactions_table",
        sql: include_str!("sql/002_create_transactions.sql"),
    },
    Migration {
        version: 3,
        name: "create_settlements_table",
        sql: include_str!("sql/003_create_settlements.sql"),
    },
];

const CREATE_TRACKING_TABLE: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    description TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);";

fn applied_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;
    Ok(version)
}

/// Brings the schema up to the latest version.
///
/// Each migration and its `_migrations` record commit together, so a
/// failed step leaves the schema at the previous version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(CREATE_TRACKING_TABLE)?;
    let current = applied_version(conn)?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        log::info!("Applying schema v{} ({})", migration.version, migration.name);

        let failed = |e: rusqlite::Error| DatabaseError::Migration {
            version: migration.version,
            name: migration.name,
            source: e,
        };
        let tx = conn.unchecked_transaction().map_err(failed)?;
        tx.execute_batch(migration.sql).map_err(failed)?;
        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.name],
        )
        .map_err(failed)?;
        tx.commit().map_err(failed)?;
    }

    Ok(())
}
