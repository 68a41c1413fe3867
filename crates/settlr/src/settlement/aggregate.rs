//! The aggregation fold: transaction pages into per-(merchant, day) settlements.

use std::collections::HashMap;

use super::{Settlement, SettlementKey, Transaction};

/// In-memory accumulators for one job run, keyed by (merchant, day).
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SettlementMap {
    run_id: String,
    entries: HashMap<SettlementKey, Settlement>,
}

impl SettlementMap {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            entries: HashMap::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &SettlementKey) -> Option<&Settlement> {
        self.entries.get(key)
    }

    pub fn add(&mut self, txn: &Transaction) {
        let run_id = &self.run_id;
        self.entries
            .entry(txn.settlement_key())
            .or_insert_with_key(|key| Settlement::empty(key, run_id))
            .add(txn);
    }

    /// Drains the accumulators into rows ready for upsert and export.
    pub fn into_rows(self) -> Vec<Settlement> {
        self.entries.into_values().collect()
    }
}

/// Folds one page of transactions into `map`.
///
/// The fold is a plain sum per key, so the final aggregate does not depend on
/// the order of transactions within or across pages.
pub fn fold_page(page: &[Transaction], map: &mut SettlementMap) {
    for txn in page {
        map.add(txn);
    }
}
