use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AccountId, Cents};

pub type EntryId = i64;

/// An append-only balance change on one account.
/// Positive amounts are credits, negative amounts are debits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub account_id: AccountId,
    pub amount: Cents,
    pub created_at: DateTime<Utc>,
}

impl Entry {
    pub fn is_debit(&self) -> bool {
        self.amount < 0
    }
}
