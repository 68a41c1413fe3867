//! Settlement domain types: source transactions and per-(merchant, day) aggregates.

pub mod aggregate;
pub mod export;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use aggregate::{fold_page, SettlementMap};
pub use export::CsvExporter;

/// Payment status of a transaction. Only `Paid` is eligible for settlement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Paid,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Paid => "PAID",
            TransactionStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransactionStatus::Pending),
            "PAID" => Ok(TransactionStatus::Paid),
            "FAILED" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status '{}'", other)),
        }
    }
}

/// A payment transaction. Amounts are integer cents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: Uuid,
    pub merchant_id: String,
    pub amount_cents: i64,
    pub fee_cents: i64,
    pub status: TransactionStatus,
    pub paid_at: DateTime<Utc>,
}

impl Transaction {
    pub fn settlement_key(&self) -> SettlementKey {
        SettlementKey {
            merchant_id: self.merchant_id.clone(),
            date: self.paid_at.date_naive(),
        }
    }
}

/// Composite aggregation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SettlementKey {
    pub merchant_id: String,
    pub date: NaiveDate,
}

/// Running totals for one (merchant, day), also the persisted settlement row.
///
/// `net_cents == gross_cents - fee_cents` at all times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub merchant_id: String,
    pub date: NaiveDate,
    pub gross_cents: i64,
    pub fee_cents: i64,
    pub net_cents: i64,
    pub txn_count: u64,
    pub generated_at: DateTime<Utc>,
    pub unique_run_id: String,
}

impl Settlement {
    pub fn empty(key: &SettlementKey, run_id: &str) -> Self {
        Self {
            merchant_id: key.merchant_id.clone(),
            date: key.date,
            gross_cents: 0,
            fee_cents: 0,
            net_cents: 0,
            txn_count: 0,
            generated_at: Utc::now(),
            unique_run_id: run_id.to_string(),
        }
    }

    /// Folds one transaction into the running totals.
    pub fn add(&mut self, txn: &Transaction) {
        self.gross_cents += txn.amount_cents;
        self.fee_cents += txn.fee_cents;
        self.net_cents += txn.amount_cents - txn.fee_cents;
        self.txn_count += 1;
    }

    pub fn key(&self) -> SettlementKey {
        SettlementKey {
            merchant_id: self.merchant_id.clone(),
            date: self.date,
        }
    }
}
