//! Builders for test transactions.

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use uuid::Uuid;

use settlr::{Transaction, TransactionStatus};

/// Builder for `Transaction` with sensible defaults (PAID, 2025-01-05 10:00 UTC).
pub struct TxnBuilder {
    merchant_id: String,
    amount_cents: i64,
    fee_cents: i64,
    status: TransactionStatus,
    ymd: (i32, u32, u32),
    hms: (u32, u32, u32),
}

impl TxnBuilder {
    pub fn new(merchant_id: &str) -> Self {
        Self {
            merchant_id: merchant_id.to_string(),
            amount_cents: 100,
            fee_cents: 0,
            status: TransactionStatus::Paid,
            ymd: (2025, 1, 5),
            hms: (10, 0, 0),
        }
    }

    pub fn amount(mut self, amount_cents: i64, fee_cents: i64) -> Self {
        self.amount_cents = amount_cents;
        self.fee_cents = fee_cents;
        self
    }

    pub fn status(mut self, status: TransactionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn on(mut self, year: i32, month: u32, day: u32) -> Self {
        self.ymd = (year, month, day);
        self
    }

    pub fn at(mut self, hour: u32, minute: u32, second: u32) -> Self {
        self.hms = (hour, minute, second);
        self
    }

    pub fn build(self) -> Transaction {
        let (y, m, d) = self.ymd;
        let (hh, mm, ss) = self.hms;
        Transaction {
            id: Uuid::new_v4(),
            merchant_id: self.merchant_id,
            amount_cents: self.amount_cents,
            fee_cents: self.fee_cents,
            status: self.status,
            paid_at: Utc
                .with_ymd_and_hms(y, m, d, hh, mm, ss)
                .single()
                .expect("valid test timestamp"),
        }
    }
}

/// `n` PAID transactions of 100 cents for `merchant`, one per minute on 2025-01-05.
pub fn paid_batch(merchant: &str, n: u32) -> Vec<Transaction> {
    (0..n)
        .map(|i| {
            TxnBuilder::new(merchant)
                .amount(100, 2)
                .at(10 + i / 60, i % 60, 0)
                .build()
        })
        .collect()
}
