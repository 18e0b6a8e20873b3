use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Cents, Currency};

pub type AccountId = i64;

/// A ledger party holding a balance in one currency.
///
/// The balance is only ever changed by the transfer orchestrator inside a
/// store transaction; owner and currency are fixed once the account exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Identity of the user that owns the account
    pub owner: String,
    pub balance: Cents,
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn is_owned_by(&self, principal: &str) -> bool {
        self.owner == principal
    }
}

/// Parameters for opening an account. The store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub owner: String,
    pub currency: Currency,
    pub balance: Cents,
}

impl NewAccount {
    pub fn new(owner: impl Into<String>, currency: Currency) -> Self {
        Self {
            owner: owner.into(),
            currency,
            balance: 0,
        }
    }

    pub fn with_balance(mut self, balance: Cents) -> Self {
        self.balance = balance;
        self
    }
}
