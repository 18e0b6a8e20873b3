//! The transactional contract the transfer orchestrator relies on.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{
    Account, AccountId, Cents, Entry, EntryId, IntegrityStats, NewAccount, Transfer, TransferId,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Busy/locked database, serialization failure, detected deadlock,
    /// lock wait timeout or a dropped connection. Safe to retry.
    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("record not found")]
    NotFound,

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("store failure: {0}")]
    Fatal(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

// SQLite extended result codes and Postgres SQLSTATEs that signal contention.
const TRANSIENT_CODES: &[&str] = &["5", "6", "261", "262", "517", "40001", "40P01"];

// SQLITE_CONSTRAINT and its extended codes (triggers included), or SQLSTATE class 23.
fn is_constraint_code(code: &str) -> bool {
    (code.len() == 5 && code.starts_with("23")) || code.parse::<i32>().is_ok_and(|c| c & 0xff == 19)
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) => {
                let code = db.code();
                if code.as_deref().is_some_and(|c| TRANSIENT_CODES.contains(&c)) {
                    StoreError::Transient(db.message().to_string())
                } else if db.is_unique_violation()
                    || db.is_foreign_key_violation()
                    || db.is_check_violation()
                    || code.as_deref().is_some_and(is_constraint_code)
                {
                    StoreError::Constraint(db.message().to_string())
                } else {
                    StoreError::Fatal(db.message().to_string())
                }
            }
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => {
                StoreError::Transient(err.to_string())
            }
            _ => StoreError::Fatal(err.to_string()),
        }
    }
}

/// Limit/offset window for listings. Listings are ordered by id ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

/// Selects transfers whose source is `from_account_id` OR whose destination is
/// `to_account_id`. Use [`TransferFilter::touching`] for every transfer of one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferFilter {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
}

impl TransferFilter {
    pub fn touching(account_id: AccountId) -> Self {
        Self {
            from_account_id: account_id,
            to_account_id: account_id,
        }
    }
}

/// Durable keyed storage for accounts, entries and transfers.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    type Tx: LedgerTx;

    /// Open a transaction. Nothing written through it is visible until commit.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn create_account(&self, account: &NewAccount) -> Result<Account, StoreError>;

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    async fn list_accounts(&self, owner: &str, page: Page) -> Result<Vec<Account>, StoreError>;

    async fn get_entry(&self, id: EntryId) -> Result<Option<Entry>, StoreError>;

    async fn list_entries(
        &self,
        account_id: AccountId,
        page: Page,
    ) -> Result<Vec<Entry>, StoreError>;

    async fn get_transfer(&self, id: TransferId) -> Result<Option<Transfer>, StoreError>;

    async fn list_transfers(
        &self,
        filter: TransferFilter,
        page: Page,
    ) -> Result<Vec<Transfer>, StoreError>;

    async fn integrity_stats(&self) -> Result<IntegrityStats, StoreError>;
}

/// An open store transaction.
///
/// Dropping a transaction without calling [`LedgerTx::commit`] rolls it back,
/// which is what makes cancellation before commit safe.
#[async_trait]
pub trait LedgerTx: Send + Sized {
    /// Apply `delta` to an account's balance and return the updated row.
    ///
    /// Atomic with respect to other transactions touching the same account:
    /// the row stays locked until this transaction ends. No sign or
    /// magnitude checks happen here.
    async fn add_account_balance(
        &mut self,
        account_id: AccountId,
        delta: Cents,
    ) -> Result<Account, StoreError>;

    async fn create_transfer(
        &mut self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: Cents,
    ) -> Result<Transfer, StoreError>;

    async fn create_entry(
        &mut self,
        account_id: AccountId,
        amount: Cents,
    ) -> Result<Entry, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}
