use std::sync::Arc;

use tokio::sync::mpsc;

use crate::domain::{
    Account, AccountId, Cents, Currency, Entry, IntegrityReport, NewAccount, Transfer,
    TransferId, TransferOutcome, TransferRequest,
};
use crate::storage::{LedgerStore, Page, SqliteStore, StoreConfig, StoreError, TransferFilter};

use super::orchestrator::validate;
use super::{AppError, RetryPolicy, TransferOrchestrator};

pub const MAX_PAGE_SIZE: u32 = 100;

/// Application service providing high-level operations for the ledger.
/// This is the primary interface for any client (CLI, API, etc.).
pub struct LedgerService<S: LedgerStore> {
    store: Arc<S>,
    transfers: TransferOrchestrator<S>,
    notifications: Option<mpsc::Sender<TransferOutcome>>,
}

/// A transfer as requested by an authenticated caller.
#[derive(Debug, Clone, Copy)]
pub struct TransferCommand {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Cents,
    /// Currency the caller expects both accounts to hold
    pub currency: Currency,
}

/// 1-indexed page as supplied by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page_id: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn new(page_id: u32, page_size: u32) -> Self {
        Self { page_id, page_size }
    }

    pub fn to_page(self) -> Result<Page, AppError> {
        if self.page_id < 1 {
            return Err(AppError::InvalidPage("page id starts at 1".to_string()));
        }
        if self.page_size < 1 || self.page_size > MAX_PAGE_SIZE {
            return Err(AppError::InvalidPage(format!(
                "page size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        let offset = (self.page_id - 1)
            .checked_mul(self.page_size)
            .ok_or_else(|| AppError::InvalidPage("page id too large".to_string()))?;
        Ok(Page::new(self.page_size, offset))
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, 10)
    }
}

impl LedgerService<SqliteStore> {
    /// Initialize a database at the given path (created if missing).
    pub async fn init(
        database_path: &str,
        config: &StoreConfig,
        retry: RetryPolicy,
    ) -> anyhow::Result<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let store = SqliteStore::init(&db_url, config).await?;
        Ok(Self::new(Arc::new(store), retry))
    }

    /// Connect to an existing database.
    pub async fn connect(
        database_path: &str,
        config: &StoreConfig,
        retry: RetryPolicy,
    ) -> anyhow::Result<Self> {
        let db_url = format!("sqlite:{}", database_path);
        let store = SqliteStore::connect(&db_url, config).await?;
        Ok(Self::new(Arc::new(store), retry))
    }
}

impl<S: LedgerStore> LedgerService<S> {
    pub fn new(store: Arc<S>, retry: RetryPolicy) -> Self {
        let transfers = TransferOrchestrator::new(Arc::clone(&store), retry);
        Self {
            store,
            transfers,
            notifications: None,
        }
    }

    /// Publish every committed transfer to `sender`. Delivery is best effort:
    /// a full or closed channel never fails or delays a transfer.
    pub fn with_notifications(mut self, sender: mpsc::Sender<TransferOutcome>) -> Self {
        self.notifications = Some(sender);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // ========================
    // Account operations
    // ========================

    /// Open an account for `owner` with an opening balance.
    pub async fn open_account(
        &self,
        owner: &str,
        currency: Currency,
        opening_balance: Cents,
    ) -> Result<Account, AppError> {
        if opening_balance < 0 {
            return Err(AppError::InvalidAmount(
                "Opening balance cannot be negative".to_string(),
            ));
        }

        let account = NewAccount::new(owner, currency).with_balance(opening_balance);
        match self.store.create_account(&account).await {
            Ok(account) => {
                tracing::info!(account_id = account.id, owner, %currency, "Account opened");
                Ok(account)
            }
            Err(StoreError::Constraint(_)) => Err(AppError::AccountAlreadyExists {
                owner: owner.to_string(),
                currency,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Get an account the principal owns.
    pub async fn get_account(&self, principal: &str, id: AccountId) -> Result<Account, AppError> {
        let account = self.find_account(id).await?;
        ensure_owner(principal, &account)?;
        Ok(account)
    }

    /// List the principal's accounts.
    pub async fn list_accounts(
        &self,
        principal: &str,
        page: PageRequest,
    ) -> Result<Vec<Account>, AppError> {
        Ok(self.store.list_accounts(principal, page.to_page()?).await?)
    }

    // ========================
    // Transfer operations
    // ========================

    /// Transfer funds out of an account the principal owns.
    pub async fn transfer(
        &self,
        principal: &str,
        command: TransferCommand,
    ) -> Result<TransferOutcome, AppError> {
        let request = TransferRequest::new(
            command.from_account_id,
            command.to_account_id,
            command.amount,
        );
        validate(&request)?;

        let from = self.find_account(command.from_account_id).await?;
        ensure_owner(principal, &from)?;
        ensure_currency(&from, command.currency)?;
        let to = self.find_account(command.to_account_id).await?;
        ensure_currency(&to, command.currency)?;

        let outcome = self.transfers.transfer(request).await?;

        self.notify(&outcome);
        Ok(outcome)
    }

    fn notify(&self, outcome: &TransferOutcome) {
        let Some(sender) = &self.notifications else {
            return;
        };
        if let Err(err) = sender.try_send(outcome.clone()) {
            tracing::warn!(
                transfer_id = outcome.transfer.id,
                error = %err,
                "Dropped transfer notification"
            );
        }
    }

    /// Get a transfer the principal is a party to.
    pub async fn get_transfer(
        &self,
        principal: &str,
        id: TransferId,
    ) -> Result<Transfer, AppError> {
        let transfer = self
            .store
            .get_transfer(id)
            .await?
            .ok_or(AppError::TransferNotFound(id))?;

        let from = self.find_account(transfer.from_account_id).await?;
        let to = self.find_account(transfer.to_account_id).await?;
        if !from.is_owned_by(principal) && !to.is_owned_by(principal) {
            return Err(AppError::Forbidden {
                principal: principal.to_string(),
                account_id: from.id,
            });
        }
        Ok(transfer)
    }

    /// List transfers into or out of one of the principal's accounts.
    pub async fn list_transfers(
        &self,
        principal: &str,
        account_id: AccountId,
        page: PageRequest,
    ) -> Result<Vec<Transfer>, AppError> {
        let page = page.to_page()?;
        self.get_account(principal, account_id).await?;
        Ok(self
            .store
            .list_transfers(TransferFilter::touching(account_id), page)
            .await?)
    }

    /// List entries of one of the principal's accounts.
    pub async fn list_entries(
        &self,
        principal: &str,
        account_id: AccountId,
        page: PageRequest,
    ) -> Result<Vec<Entry>, AppError> {
        let page = page.to_page()?;
        self.get_account(principal, account_id).await?;
        Ok(self.store.list_entries(account_id, page).await?)
    }

    // ========================
    // Integrity operations
    // ========================

    /// Check ledger integrity and return a report.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, AppError> {
        let stats = self.store.integrity_stats().await?;
        Ok(IntegrityReport::from_stats(stats))
    }

    async fn find_account(&self, id: AccountId) -> Result<Account, AppError> {
        self.store
            .get_account(id)
            .await?
            .ok_or(AppError::AccountNotFound(id))
    }
}

fn ensure_owner(principal: &str, account: &Account) -> Result<(), AppError> {
    if account.is_owned_by(principal) {
        Ok(())
    } else {
        Err(AppError::Forbidden {
            principal: principal.to_string(),
            account_id: account.id,
        })
    }
}

fn ensure_currency(account: &Account, expected: Currency) -> Result<(), AppError> {
    if account.currency == expected {
        Ok(())
    } else {
        Err(AppError::CurrencyMismatch {
            account_id: account.id,
            expected,
            actual: account.currency,
        })
    }
}
