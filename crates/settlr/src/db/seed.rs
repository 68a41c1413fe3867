//! Synthetic transaction data for local runs and load tests.

use chrono::Duration;
use rand::Rng;
use uuid::Uuid;

use super::{transaction_repo, Database, DatabaseError};
use crate::job::DateRange;
use crate::settlement::{Transaction, TransactionStatus};

/// Rows inserted per SQL transaction.
pub const SEED_BATCH_SIZE: usize = 10_000;

const MERCHANT_COUNT: usize = 20;

/// Fee charged on seeded transactions, in basis points.
const FEE_BPS: i64 = 300;

/// Inserts `count` random transactions with `paid_at` spread over `range`.
///
/// Skipped entirely when the table already holds at least `count` rows.
/// Returns the number of rows inserted.
pub fn seed_transactions<R: Rng>(
    db: &Database,
    count: usize,
    range: &DateRange,
    rng: &mut R,
) -> Result<usize, DatabaseError> {
    let existing = transaction_repo::count_all(db)?;
    if existing >= count as u64 {
        log::info!("Transactions already exist ({}), skipping seed", existing);
        return Ok(0);
    }

    let merchants: Vec<String> = (1..=MERCHANT_COUNT)
        .map(|n| format!("merchant_{:03}", n))
        .collect();
    let span_secs = (range.end_exclusive() - range.start()).num_seconds().max(1);
    let batches = count.div_ceil(SEED_BATCH_SIZE);

    let mut inserted = 0;
    for batch in 0..batches {
        let size = SEED_BATCH_SIZE.min(count - inserted);
        let txns: Vec<Transaction> = (0..size)
            .map(|_| random_transaction(rng, &merchants, range, span_secs))
            .collect();
        transaction_repo::insert(db, &txns)?;
        inserted += size;
        log::info!("Seeded batch {}/{} ({} transactions)", batch + 1, batches, size);
    }

    log::info!("Successfully seeded {} transactions", inserted);
    Ok(inserted)
}

fn random_transaction<R: Rng>(
    rng: &mut R,
    merchants: &[String],
    range: &DateRange,
    span_secs: i64,
) -> Transaction {
    let amount_cents: i64 = rng.gen_range(100..50_000);
    // 90% paid, 5% failed, 5% pending.
    let status = match rng.gen_range(0..100) {
        0..=89 => TransactionStatus::Paid,
        90..=94 => TransactionStatus::Failed,
        _ => TransactionStatus::Pending,
    };
    Transaction {
        id: Uuid::new_v4(),
        merchant_id: merchants[rng.gen_range(0..merchants.len())].clone(),
        amount_cents,
        fee_cents: amount_cents * FEE_BPS / 10_000,
        status,
        paid_at: range.start() + Duration::seconds(rng.gen_range(0..span_secs)),
    }
}
