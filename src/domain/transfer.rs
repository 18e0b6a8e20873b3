use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Account, AccountId, Cents, Entry};

pub type TransferId = i64;

/// A transfer represents an atomic movement of money from one account to another.
/// Transfers are immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    /// Source account (balance decreases)
    pub from_account_id: AccountId,
    /// Destination account (balance increases)
    pub to_account_id: AccountId,
    /// Amount in cents (always positive)
    pub amount: Cents,
    pub created_at: DateTime<Utc>,
}

/// What a caller asks the orchestrator to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Cents,
}

impl TransferRequest {
    pub fn new(from_account_id: AccountId, to_account_id: AccountId, amount: Cents) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }

    /// Signed balance change this transfer applies to `account_id`.
    pub fn delta_for(&self, account_id: AccountId) -> Cents {
        if account_id == self.from_account_id {
            -self.amount
        } else if account_id == self.to_account_id {
            self.amount
        } else {
            0
        }
    }
}

/// Everything a committed transfer wrote, returned as a plain value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub transfer: Transfer,
    pub from_entry: Entry,
    pub to_entry: Entry,
    pub from_account: Account,
    pub to_account: Account,
}
