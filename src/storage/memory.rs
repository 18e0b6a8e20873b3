//! In-memory ledger store.
//!
//! Every account row carries its own async lock. A transaction takes the row
//! lock on its first balance update and keeps it until commit, rollback or
//! drop, the same way a relational store holds row locks. Readers only see
//! committed rows. Lock waits are bounded by `lock_timeout`; a wait that
//! runs out is reported as a transient error, standing in for a store's
//! deadlock detector.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::OwnedMutexGuard;

use crate::domain::{
    Account, AccountId, Cents, Currency, Entry, EntryId, IntegrityStats, NewAccount, Transfer,
    TransferId,
};

use super::{LedgerStore, LedgerTx, Page, StoreError, TransferFilter};

/// Failure a test can make the next commits report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Transient,
    Fatal,
}

struct Row {
    lock: Arc<tokio::sync::Mutex<()>>,
    committed: Mutex<Account>,
}

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Arc<Row>>,
    owners: HashSet<(String, Currency)>,
    entries: BTreeMap<EntryId, Entry>,
    transfers: BTreeMap<TransferId, Transfer>,
}

struct Shared {
    tables: Mutex<Tables>,
    lock_timeout: Duration,
    pending_faults: Mutex<Option<(u32, Fault)>>,
    transactions_started: AtomicU64,
    next_account_id: AtomicI64,
    next_entry_id: AtomicI64,
    next_transfer_id: AtomicI64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn row(&self, id: AccountId) -> Option<Arc<Row>> {
        lock(&self.tables).accounts.get(&id).cloned()
    }

    fn take_fault(&self) -> Option<Fault> {
        let mut pending = lock(&self.pending_faults);
        let (remaining, fault) = (*pending)?;
        *pending = if remaining > 1 { Some((remaining - 1, fault)) } else { None };
        Some(fault)
    }
}

#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_secs(1))
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                lock_timeout,
                pending_faults: Mutex::new(None),
                transactions_started: AtomicU64::new(0),
                next_account_id: AtomicI64::new(0),
                next_entry_id: AtomicI64::new(0),
                next_transfer_id: AtomicI64::new(0),
            }),
        }
    }

    /// Make the next `count` commits fail with `fault` (and roll back).
    pub fn fail_next_commits(&self, count: u32, fault: Fault) {
        *lock(&self.shared.pending_faults) = if count == 0 { None } else { Some((count, fault)) };
    }

    /// Number of transactions opened so far.
    pub fn transactions_started(&self) -> u64 {
        self.shared.transactions_started.load(Ordering::SeqCst)
    }

    /// Committed state of every account, ordered by id.
    pub fn all_accounts(&self) -> Vec<Account> {
        let tables = lock(&self.shared.tables);
        tables
            .accounts
            .values()
            .map(|row| lock(&row.committed).clone())
            .collect()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        self.shared.transactions_started.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryTx {
            shared: Arc::clone(&self.shared),
            held: Vec::new(),
            working: BTreeMap::new(),
            transfers: Vec::new(),
            entries: Vec::new(),
        })
    }

    async fn create_account(&self, account: &NewAccount) -> Result<Account, StoreError> {
        let mut tables = lock(&self.shared.tables);
        let key = (account.owner.clone(), account.currency);
        if tables.owners.contains(&key) {
            return Err(StoreError::Constraint(format!(
                "account for {} in {} already exists",
                account.owner, account.currency
            )));
        }

        let created = Account {
            id: self.shared.next_account_id.fetch_add(1, Ordering::SeqCst) + 1,
            owner: account.owner.clone(),
            balance: account.balance,
            currency: account.currency,
            created_at: Utc::now(),
        };
        tables.owners.insert(key);
        tables.accounts.insert(
            created.id,
            Arc::new(Row {
                lock: Arc::new(tokio::sync::Mutex::new(())),
                committed: Mutex::new(created.clone()),
            }),
        );
        Ok(created)
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.shared.row(id).map(|row| lock(&row.committed).clone()))
    }

    async fn list_accounts(&self, owner: &str, page: Page) -> Result<Vec<Account>, StoreError> {
        let tables = lock(&self.shared.tables);
        Ok(tables
            .accounts
            .values()
            .map(|row| lock(&row.committed).clone())
            .filter(|account| account.owner == owner)
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn get_entry(&self, id: EntryId) -> Result<Option<Entry>, StoreError> {
        Ok(lock(&self.shared.tables).entries.get(&id).cloned())
    }

    async fn list_entries(
        &self,
        account_id: AccountId,
        page: Page,
    ) -> Result<Vec<Entry>, StoreError> {
        let tables = lock(&self.shared.tables);
        Ok(tables
            .entries
            .values()
            .filter(|entry| entry.account_id == account_id)
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Option<Transfer>, StoreError> {
        Ok(lock(&self.shared.tables).transfers.get(&id).cloned())
    }

    async fn list_transfers(
        &self,
        filter: TransferFilter,
        page: Page,
    ) -> Result<Vec<Transfer>, StoreError> {
        let tables = lock(&self.shared.tables);
        Ok(tables
            .transfers
            .values()
            .filter(|t| {
                t.from_account_id == filter.from_account_id
                    || t.to_account_id == filter.to_account_id
            })
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    async fn integrity_stats(&self) -> Result<IntegrityStats, StoreError> {
        let tables = lock(&self.shared.tables);
        let balances: Vec<Cents> = tables
            .accounts
            .values()
            .map(|row| lock(&row.committed).balance)
            .collect();

        Ok(IntegrityStats {
            account_count: balances.len() as i64,
            transfer_count: tables.transfers.len() as i64,
            entry_count: tables.entries.len() as i64,
            entry_sum: tables.entries.values().map(|e| e.amount).sum(),
            negative_balances: balances.iter().filter(|b| **b < 0).count() as i64,
            invalid_amounts: tables.transfers.values().filter(|t| t.amount <= 0).count() as i64,
        })
    }
}

/// An open in-memory transaction. Dropping it releases its row locks and
/// discards every staged write.
pub struct MemoryTx {
    shared: Arc<Shared>,
    held: Vec<OwnedMutexGuard<()>>,
    working: BTreeMap<AccountId, (Arc<Row>, Account)>,
    transfers: Vec<Transfer>,
    entries: Vec<Entry>,
}

impl MemoryTx {
    fn account_exists(&self, id: AccountId) -> bool {
        self.working.contains_key(&id) || self.shared.row(id).is_some()
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn add_account_balance(
        &mut self,
        account_id: AccountId,
        delta: Cents,
    ) -> Result<Account, StoreError> {
        if !self.working.contains_key(&account_id) {
            let row = self.shared.row(account_id).ok_or(StoreError::NotFound)?;
            let guard = tokio::time::timeout(
                self.shared.lock_timeout,
                Arc::clone(&row.lock).lock_owned(),
            )
            .await
            .map_err(|_| {
                StoreError::Transient(format!("lock wait timeout on account {}", account_id))
            })?;
            self.held.push(guard);

            let current = lock(&row.committed).clone();
            self.working.insert(account_id, (row, current));
        }

        let (_, account) = self
            .working
            .get_mut(&account_id)
            .ok_or(StoreError::NotFound)?;
        account.balance = account.balance.checked_add(delta).ok_or_else(|| {
            StoreError::Constraint(format!("balance overflow on account {}", account_id))
        })?;
        Ok(account.clone())
    }

    async fn create_transfer(
        &mut self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: Cents,
    ) -> Result<Transfer, StoreError> {
        if amount <= 0 {
            return Err(StoreError::Constraint("transfer amount must be positive".into()));
        }
        if from_account_id == to_account_id {
            return Err(StoreError::Constraint("transfer accounts must differ".into()));
        }
        if !self.account_exists(from_account_id) || !self.account_exists(to_account_id) {
            return Err(StoreError::Constraint("transfer references unknown account".into()));
        }

        let transfer = Transfer {
            id: self.shared.next_transfer_id.fetch_add(1, Ordering::SeqCst) + 1,
            from_account_id,
            to_account_id,
            amount,
            created_at: Utc::now(),
        };
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn create_entry(
        &mut self,
        account_id: AccountId,
        amount: Cents,
    ) -> Result<Entry, StoreError> {
        if !self.account_exists(account_id) {
            return Err(StoreError::Constraint("entry references unknown account".into()));
        }

        let entry = Entry {
            id: self.shared.next_entry_id.fetch_add(1, Ordering::SeqCst) + 1,
            account_id,
            amount,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn commit(self) -> Result<(), StoreError> {
        match self.shared.take_fault() {
            Some(Fault::Transient) => {
                return Err(StoreError::Transient("injected serialization failure".into()));
            }
            Some(Fault::Fatal) => return Err(StoreError::Fatal("injected store fault".into())),
            None => {}
        }

        let MemoryTx {
            shared,
            held,
            working,
            transfers,
            entries,
        } = self;

        {
            let mut tables = lock(&shared.tables);
            for (_, (row, account)) in working {
                *lock(&row.committed) = account;
            }
            tables.transfers.extend(transfers.into_iter().map(|t| (t.id, t)));
            tables.entries.extend(entries.into_iter().map(|e| (e.id, e)));
        }

        drop(held);
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (MemoryStore, Account, Account) {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(50));
        let a = store
            .create_account(&NewAccount::new("alice", Currency::Usd).with_balance(100))
            .await
            .unwrap();
        let b = store
            .create_account(&NewAccount::new("bob", Currency::Usd).with_balance(50))
            .await
            .unwrap();
        (store, a, b)
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let (store, a, _) = seeded().await;

        let mut tx = store.begin().await.unwrap();
        let updated = tx.add_account_balance(a.id, -30).await.unwrap();
        assert_eq!(updated.balance, 70);
        assert_eq!(store.get_account(a.id).await.unwrap().unwrap().balance, 100);

        tx.commit().await.unwrap();
        assert_eq!(store.get_account(a.id).await.unwrap().unwrap().balance, 70);
    }

    #[tokio::test]
    async fn test_dropped_transaction_discards_writes() {
        let (store, a, b) = seeded().await;

        {
            let mut tx = store.begin().await.unwrap();
            tx.add_account_balance(a.id, -10).await.unwrap();
            tx.create_transfer(a.id, b.id, 10).await.unwrap();
            tx.create_entry(a.id, -10).await.unwrap();
        }

        assert_eq!(store.get_account(a.id).await.unwrap().unwrap().balance, 100);
        assert!(store.list_entries(a.id, Page::default()).await.unwrap().is_empty());

        // The row lock was released on drop
        let mut tx = store.begin().await.unwrap();
        tx.add_account_balance(a.id, 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_opposite_lock_order_times_out_as_transient() {
        let (store, a, b) = seeded().await;

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first.add_account_balance(a.id, -1).await.unwrap();
        second.add_account_balance(b.id, -1).await.unwrap();

        let err = first.add_account_balance(b.id, 1).await.unwrap_err();
        assert!(err.is_transient(), "expected lock wait timeout, got {err:?}");
    }

    #[tokio::test]
    async fn test_injected_commit_faults() {
        let (store, a, _) = seeded().await;
        store.fail_next_commits(1, Fault::Transient);

        let mut tx = store.begin().await.unwrap();
        tx.add_account_balance(a.id, 5).await.unwrap();
        assert!(tx.commit().await.unwrap_err().is_transient());
        assert_eq!(store.get_account(a.id).await.unwrap().unwrap().balance, 100);

        let mut tx = store.begin().await.unwrap();
        tx.add_account_balance(a.id, 5).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.get_account(a.id).await.unwrap().unwrap().balance, 105);
        assert_eq!(store.transactions_started(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_owner_currency_rejected() {
        let (store, _, _) = seeded().await;
        let err = store
            .create_account(&NewAccount::new("alice", Currency::Usd))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));

        store
            .create_account(&NewAccount::new("alice", Currency::Eur))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_account_update_is_not_found() {
        let (store, _, _) = seeded().await;
        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            tx.add_account_balance(999, 1).await.unwrap_err(),
            StoreError::NotFound
        );
    }
}
