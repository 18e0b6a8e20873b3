use serde::Serialize;

use super::{Account, AccountId, Cents};

/// Order two account ids so that every transaction locks the lower id first.
///
/// Concurrent transfers between the same pair in opposite directions then
/// acquire their row locks in the same sequence, so no circular wait can form.
pub fn lock_order(a: AccountId, b: AccountId) -> (AccountId, AccountId) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Sum of balances across a set of accounts.
/// Transfers move money between accounts, so this total never changes.
pub fn total_balance<'a>(accounts: impl IntoIterator<Item = &'a Account>) -> Cents {
    accounts.into_iter().map(|a| a.balance).sum()
}

/// Raw aggregates the store reports for an integrity check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityStats {
    pub account_count: i64,
    pub transfer_count: i64,
    pub entry_count: i64,
    /// Sum of every entry amount in the ledger
    pub entry_sum: Cents,
    pub negative_balances: i64,
    pub invalid_amounts: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub stats: IntegrityStats,
    pub issues: Vec<String>,
}

impl IntegrityReport {
    pub fn from_stats(stats: IntegrityStats) -> Self {
        let mut issues = Vec::new();

        if stats.entry_sum != 0 {
            issues.push(format!(
                "Entries do not sum to zero (off by {} cents)",
                stats.entry_sum
            ));
        }
        if stats.entry_count != stats.transfer_count * 2 {
            issues.push(format!(
                "Expected {} entries for {} transfers, found {}",
                stats.transfer_count * 2,
                stats.transfer_count,
                stats.entry_count
            ));
        }
        if stats.negative_balances > 0 {
            issues.push(format!(
                "{} account(s) have a negative balance",
                stats.negative_balances
            ));
        }
        if stats.invalid_amounts > 0 {
            issues.push(format!(
                "{} transfer(s) have a non-positive amount",
                stats.invalid_amounts
            ));
        }

        Self { stats, issues }
    }

    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}
