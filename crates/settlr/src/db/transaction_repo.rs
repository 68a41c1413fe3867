//! Transaction repository: the read side the settlement worker pages through.

use chrono::Utc;
use rusqlite::{params, Row};
use uuid::Uuid;

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::job::DateRange;
use crate::ports::{StoreResult, TransactionSource};
use crate::settlement::{Transaction, TransactionStatus};

const SELECT_COLUMNS: &str = "id, merchant_id, amount_cents, fee_cents, status, paid_at";

/// A raw transaction row from the database.
#[derive(Debug, Clone)]
struct TransactionRow {
    id: String,
    merchant_id: String,
    amount_cents: i64,
    fee_cents: i64,
    status: String,
    paid_at: String,
}

impl TransactionRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            merchant_id: row.get(1)?,
            amount_cents: row.get(2)?,
            fee_cents: row.get(3)?,
            status: row.get(4)?,
            paid_at: row.get(5)?,
        })
    }

    fn into_transaction(self) -> Result<Transaction, DatabaseError> {
        Ok(Transaction {
            id: Uuid::parse_str(&self.id).map_err(|e| DatabaseError::Decode {
                column: "id",
                reason: e.to_string(),
            })?,
            merchant_id: self.merchant_id,
            amount_cents: self.amount_cents,
            fee_cents: self.fee_cents,
            status: self
                .status
                .parse::<TransactionStatus>()
                .map_err(|reason| DatabaseError::Decode {
                    column: "status",
                    reason,
                })?,
            paid_at: parse_timestamp(&self.paid_at, "paid_at")?,
        })
    }
}

/// Inserts transactions in a single SQL transaction.
pub fn insert(db: &Database, txns: &[Transaction]) -> Result<(), DatabaseError> {
    if txns.is_empty() {
        return Ok(());
    }
    let created_at = format_timestamp(Utc::now());
    db.with_conn_mut(|conn| {
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO transactions (id, merchant_id, amount_cents, fee_cents, status,
                 paid_at, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for txn in txns {
                stmt.execute(params![
                    txn.id.to_string(),
                    txn.merchant_id,
                    txn.amount_cents,
                    txn.fee_cents,
                    txn.status.as_str(),
                    format_timestamp(txn.paid_at),
                    created_at,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    })
}

/// Counts all rows regardless of status or date.
pub fn count_all(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM transactions", [], |r| r.get(0))?;
        Ok(count as u64)
    })
}

/// Counts PAID transactions whose `paid_at` falls inside `range`.
pub fn count_paid(db: &Database, range: &DateRange) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transactions
             WHERE status = 'PAID' AND paid_at >= ?1 AND paid_at < ?2",
            params![
                format_timestamp(range.start()),
                format_timestamp(range.end_exclusive())
            ],
            |r| r.get(0),
        )?;
        Ok(count as u64)
    })
}

/// One page of PAID transactions in `range`, ordered by `(paid_at, id)`.
pub fn page_paid(
    db: &Database,
    range: &DateRange,
    offset: u64,
    limit: u64,
) -> Result<Vec<Transaction>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transactions
             WHERE status = 'PAID' AND paid_at >= ?1 AND paid_at < ?2
             ORDER BY paid_at ASC, id ASC LIMIT ?3 OFFSET ?4",
            SELECT_COLUMNS
        ))?;
        let rows = stmt
            .query_map(
                params![
                    format_timestamp(range.start()),
                    format_timestamp(range.end_exclusive()),
                    limit as i64,
                    offset as i64
                ],
                TransactionRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;

    rows.into_iter()
        .map(TransactionRow::into_transaction)
        .collect()
}

impl TransactionSource for Database {
    fn count(&self, range: &DateRange) -> StoreResult<u64> {
        Ok(count_paid(self, range)?)
    }

    fn get_page(
        &self,
        range: &DateRange,
        offset: u64,
        limit: u64,
    ) -> StoreResult<Vec<Transaction>> {
        Ok(page_paid(self, range, offset, limit)?)
    }
}
