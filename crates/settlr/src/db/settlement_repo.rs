//! Settlement repository.
//!
//! Rows are keyed by `(merchant_id, date)`; a re-run overwrites the
//! aggregates rather than adding to them.

use chrono::{NaiveDate, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::job::DATE_FORMAT;
use crate::ports::{SettlementSink, StoreResult};
use crate::settlement::Settlement;

const UPSERT_SQL: &str = "INSERT INTO settlements (id, merchant_id, date, gross_cents, fee_cents,
     net_cents, txn_count, generated_at, unique_run_id, created_at, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
     ON CONFLICT(merchant_id, date) DO UPDATE SET
         gross_cents = excluded.gross_cents,
         fee_cents = excluded.fee_cents,
         net_cents = excluded.net_cents,
         txn_count = excluded.txn_count,
         generated_at = excluded.generated_at,
         unique_run_id = excluded.unique_run_id,
         updated_at = excluded.updated_at";

struct SettlementRow {
    merchant_id: String,
    date: String,
    gross_cents: i64,
    fee_cents: i64,
    net_cents: i64,
    txn_count: i64,
    generated_at: String,
    unique_run_id: String,
}

impl SettlementRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            merchant_id: row.get("merchant_id")?,
            date: row.get("date")?,
            gross_cents: row.get("gross_cents")?,
            fee_cents: row.get("fee_cents")?,
            net_cents: row.get("net_cents")?,
            txn_count: row.get("txn_count")?,
            generated_at: row.get("generated_at")?,
            unique_run_id: row.get("unique_run_id")?,
        })
    }

    fn into_settlement(self) -> Result<Settlement, DatabaseError> {
        let date = NaiveDate::parse_from_str(&self.date, DATE_FORMAT).map_err(|e| {
            DatabaseError::Decode {
                column: "date",
                reason: e.to_string(),
            }
        })?;
        Ok(Settlement {
            merchant_id: self.merchant_id,
            date,
            gross_cents: self.gross_cents,
            fee_cents: self.fee_cents,
            net_cents: self.net_cents,
            txn_count: self.txn_count.max(0) as u64,
            generated_at: parse_timestamp(&self.generated_at, "generated_at")?,
            unique_run_id: self.unique_run_id,
        })
    }
}

/// Upserts all rows atomically. An empty batch touches nothing.
pub fn upsert_batch(db: &Database, rows: &[Settlement]) -> Result<(), DatabaseError> {
    if rows.is_empty() {
        return Ok(());
    }
    let now = format_timestamp(Utc::now());
    db.with_conn_mut(|conn| {
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(UPSERT_SQL)?;
            for row in rows {
                stmt.execute(params![
                    Uuid::new_v4().to_string(),
                    row.merchant_id,
                    row.date.format(DATE_FORMAT).to_string(),
                    row.gross_cents,
                    row.fee_cents,
                    row.net_cents,
                    row.txn_count as i64,
                    format_timestamp(row.generated_at),
                    row.unique_run_id,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    })?;
    log::debug!("Upserted {} settlement rows", rows.len());
    Ok(())
}

/// Lists every settlement ordered by merchant then date.
pub fn list(db: &Database) -> Result<Vec<Settlement>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT merchant_id, date, gross_cents, fee_cents, net_cents, txn_count,
                    generated_at, unique_run_id
             FROM settlements ORDER BY merchant_id ASC, date ASC",
        )?;
        let rows = stmt
            .query_map([], SettlementRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    rows.into_iter().map(SettlementRow::into_settlement).collect()
}

impl SettlementSink for Database {
    fn upsert_batch(&self, rows: &[Settlement]) -> StoreResult<()> {
        Ok(upsert_batch(self, rows)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settlement::SettlementKey;

    fn row(merchant: &str, day: u32, gross: i64, fee: i64, count: u64, run: &str) -> Settlement {
        let key = SettlementKey {
            merchant_id: merchant.to_string(),
            date: NaiveDate::from_ymd_opt(2025, 1, day).unwrap(),
        };
        let mut s = Settlement::empty(&key, run);
        s.gross_cents = gross;
        s.fee_cents = fee;
        s.net_cents = gross - fee;
        s.txn_count = count;
        s
    }

    #[test]
    fn test_upsert_inserts_rows() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_batch(&[row("M1", 5, 150, 4, 2, "run-a"), row("M2", 5, 10, 0, 1, "run-a")])
            .unwrap();

        let stored = list(&db).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].merchant_id, "M1");
        assert_eq!(stored[0].net_cents, 146);
        assert_eq!(stored[0].txn_count, 2);
    }

    #[test]
    fn test_upsert_overwrites_instead_of_adding() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_batch(&[row("M1", 5, 150, 4, 2, "run-a")]).unwrap();
        db.upsert_batch(&[row("M1", 5, 150, 4, 2, "run-b")]).unwrap();

        let stored = list(&db).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].gross_cents, 150);
        assert_eq!(stored[0].txn_count, 2);
        assert_eq!(stored[0].unique_run_id, "run-b");
    }

    #[test]
    fn test_upsert_empty_batch_is_noop() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_batch(&[]).unwrap();
        assert!(list(&db).unwrap().is_empty());
    }

    #[test]
    fn test_disjoint_keys_are_untouched() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_batch(&[row("M1", 5, 100, 0, 1, "run-a")]).unwrap();
        db.upsert_batch(&[row("M1", 6, 200, 0, 1, "run-b")]).unwrap();

        let stored = list(&db).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].unique_run_id, "run-a");
        assert_eq!(stored[1].unique_run_id, "run-b");
    }
}
