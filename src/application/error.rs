use serde::Serialize;
use thiserror::Error;

use crate::domain::{AccountId, Cents, Currency, TransferId};
use crate::storage::StoreError;

/// Coarse error classes an outer protocol layer maps to its own status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// Bad input. Never retried.
    Validation,
    NotFound,
    Forbidden,
    InsufficientFunds,
    /// Transient store failures outlasted every retry.
    Unavailable,
    Internal,
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Source and destination must be different accounts (got {0} twice)")]
    SameAccount(AccountId),

    #[error("Invalid amount: {0} (must be greater than zero)")]
    InvalidAmount(Cents),

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Insufficient funds in account {account_id}: balance {balance}, required {required}")]
    InsufficientFunds {
        account_id: AccountId,
        balance: Cents,
        required: Cents,
    },

    #[error("Ledger store unavailable after {attempts} attempt(s): {source}")]
    Unavailable { attempts: u32, source: StoreError },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::SameAccount(_)
            | TransferError::InvalidAmount(_)
            | TransferError::AccountNotFound(_) => ErrorKind::Validation,
            TransferError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            TransferError::Unavailable { .. } => ErrorKind::Unavailable,
            TransferError::Store(_) => ErrorKind::Internal,
        }
    }

    /// True for store failures the orchestrator should run again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::Store(e) if e.is_transient())
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Account already exists for {owner} in {currency}")]
    AccountAlreadyExists { owner: String, currency: Currency },

    #[error("Transfer not found: {0}")]
    TransferNotFound(TransferId),

    #[error("Account {account_id} does not belong to {principal}")]
    Forbidden {
        principal: String,
        account_id: AccountId,
    },

    #[error("Account {account_id} currency mismatch: {actual} vs {expected}")]
    CurrencyMismatch {
        account_id: AccountId,
        expected: Currency,
        actual: Currency,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid page: {0}")]
    InvalidPage(String),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("Database error: {0}")]
    Store(#[from] StoreError),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::AccountNotFound(_) | AppError::TransferNotFound(_) => ErrorKind::NotFound,
            AppError::Forbidden { .. } => ErrorKind::Forbidden,
            AppError::AccountAlreadyExists { .. }
            | AppError::CurrencyMismatch { .. }
            | AppError::InvalidAmount(_)
            | AppError::InvalidPage(_) => ErrorKind::Validation,
            AppError::Transfer(e) => e.kind(),
            AppError::Store(e) if e.is_transient() => ErrorKind::Unavailable,
            AppError::Store(_) => ErrorKind::Internal,
        }
    }
}
