// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bankledger::application::{LedgerService, RetryPolicy};
use bankledger::domain::{Account, Cents, Currency, NewAccount};
use bankledger::storage::{LedgerStore, MemoryStore, SqliteStore, StoreConfig};
use tempfile::TempDir;

/// Retry policy generous enough for heavily contended tests.
pub fn contended_retry() -> RetryPolicy {
    RetryPolicy::exponential(50, Duration::from_millis(2), Duration::from_millis(50))
}

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService<SqliteStore>, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = LedgerService::init(
        db_path.to_str().unwrap(),
        &StoreConfig::default(),
        contended_retry(),
    )
    .await?;
    Ok((service, temp_dir))
}

/// Helper to create a service over the in-memory store
pub fn memory_service() -> LedgerService<MemoryStore> {
    LedgerService::new(Arc::new(MemoryStore::new()), contended_retry())
}

/// In-memory service that never retries and waits long on row locks, so a
/// lock-order cycle surfaces as a failed transfer instead of being retried away.
pub fn strict_memory_service() -> LedgerService<MemoryStore> {
    LedgerService::new(
        Arc::new(MemoryStore::with_lock_timeout(Duration::from_secs(5))),
        RetryPolicy::no_retry(),
    )
}

/// Open an account directly through the store with an opening balance.
pub async fn funded_account<S: LedgerStore>(
    store: &S,
    owner: &str,
    balance: Cents,
) -> Result<Account> {
    Ok(store
        .create_account(&NewAccount::new(owner, Currency::Usd).with_balance(balance))
        .await?)
}

/// Test fixture: Alice with 100.00 and Bob with 50.00, both in USD
pub struct StandardAccounts {
    pub alice: Account,
    pub bob: Account,
}

impl StandardAccounts {
    pub async fn create<S: LedgerStore>(service: &LedgerService<S>) -> Result<Self> {
        let alice = service.open_account("alice", Currency::Usd, 10_000).await?;
        let bob = service.open_account("bob", Currency::Usd, 5_000).await?;
        Ok(Self { alice, bob })
    }
}

/// Sum of all balances in the ledger, read through the store.
pub async fn ledger_total<S: LedgerStore>(store: &S, accounts: &[&Account]) -> Result<Cents> {
    let mut total = 0;
    for account in accounts {
        total += store
            .get_account(account.id)
            .await?
            .map(|a| a.balance)
            .unwrap_or_default();
    }
    Ok(total)
}
