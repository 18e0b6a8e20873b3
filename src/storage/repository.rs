use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use crate::domain::{
    Account, AccountId, Cents, Currency, Entry, EntryId, IntegrityStats, NewAccount, Transfer,
    TransferId,
};

use super::{LedgerStore, LedgerTx, MIGRATION_001_INITIAL, Page, StoreError, TransferFilter};

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";
const ENTRY_COLUMNS: &str = "id, account_id, amount, created_at";
const TRANSFER_COLUMNS: &str = "id, from_account_id, to_account_id, amount, created_at";

/// Connection settings for [`SqliteStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub max_connections: u32,
    /// How long a writer waits on a locked database before the store
    /// reports a transient error.
    pub busy_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_connections: 8,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// SQLite-backed ledger store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to an existing SQLite database. Fails if the file is missing.
    pub async fn connect(database_url: &str, config: &StoreConfig) -> Result<Self> {
        Self::open(database_url, config, false).await
    }

    async fn open(database_url: &str, config: &StoreConfig, create: bool) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database url: {}", database_url))?
            .create_if_missing(create)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to database {}", database_url))?;

        tracing::debug!(database_url, create, "SQLite pool established");
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a database (create if missing + migrate).
    pub async fn init(database_url: &str, config: &StoreConfig) -> Result<Self> {
        let store = Self::open(database_url, config, true).await?;
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    type Tx = SqliteTx;

    async fn begin(&self) -> Result<SqliteTx, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(SqliteTx { tx })
    }

    async fn create_account(&self, account: &NewAccount) -> Result<Account, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO accounts (owner, balance, currency, created_at) VALUES (?, ?, ?, ?) RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(&account.owner)
        .bind(account.balance)
        .bind(account.currency.as_str())
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&self.pool)
        .await?;

        row_to_account(&row)
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn list_accounts(&self, owner: &str, page: Page) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE owner = ? ORDER BY id LIMIT ? OFFSET ?"
        ))
        .bind(owner)
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_account).collect()
    }

    async fn get_entry(&self, id: EntryId) -> Result<Option<Entry>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_entry).transpose()
    }

    async fn list_entries(
        &self,
        account_id: AccountId,
        page: Page,
    ) -> Result<Vec<Entry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE account_id = ? ORDER BY id LIMIT ? OFFSET ?"
        ))
        .bind(account_id)
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Option<Transfer>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_transfer).transpose()
    }

    async fn list_transfers(
        &self,
        filter: TransferFilter,
        page: Page,
    ) -> Result<Vec<Transfer>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TRANSFER_COLUMNS} FROM transfers
            WHERE from_account_id = ? OR to_account_id = ?
            ORDER BY id
            LIMIT ? OFFSET ?
            "#
        ))
        .bind(filter.from_account_id)
        .bind(filter.to_account_id)
        .bind(i64::from(page.limit))
        .bind(i64::from(page.offset))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_transfer).collect()
    }

    async fn integrity_stats(&self) -> Result<IntegrityStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM accounts) AS account_count,
                (SELECT COUNT(*) FROM accounts WHERE balance < 0) AS negative_balances,
                (SELECT COUNT(*) FROM transfers) AS transfer_count,
                (SELECT COUNT(*) FROM transfers WHERE amount <= 0) AS invalid_amounts,
                (SELECT COUNT(*) FROM entries) AS entry_count,
                (SELECT COALESCE(SUM(amount), 0) FROM entries) AS entry_sum
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(IntegrityStats {
            account_count: row.try_get("account_count")?,
            transfer_count: row.try_get("transfer_count")?,
            entry_count: row.try_get("entry_count")?,
            entry_sum: row.try_get("entry_sum")?,
            negative_balances: row.try_get("negative_balances")?,
            invalid_amounts: row.try_get("invalid_amounts")?,
        })
    }
}

/// An open SQLite transaction. Rolled back by sqlx when dropped uncommitted.
pub struct SqliteTx {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl LedgerTx for SqliteTx {
    async fn add_account_balance(
        &mut self,
        account_id: AccountId,
        delta: Cents,
    ) -> Result<Account, StoreError> {
        // SQLite turns an overflowing integer sum into REAL, so only rows
        // with room for the delta are updated.
        let (min, max) = if delta > 0 {
            (i64::MIN, i64::MAX - delta)
        } else {
            (i64::MIN - delta, i64::MAX)
        };
        let row = sqlx::query(&format!(
            "UPDATE accounts SET balance = balance + ? WHERE id = ? AND balance BETWEEN ? AND ? RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(delta)
        .bind(account_id)
        .bind(min)
        .bind(max)
        .fetch_optional(&mut *self.tx)
        .await?;

        if let Some(row) = row {
            return row_to_account(&row);
        }

        let exists = sqlx::query("SELECT 1 FROM accounts WHERE id = ?")
            .bind(account_id)
            .fetch_optional(&mut *self.tx)
            .await?
            .is_some();
        if exists {
            Err(StoreError::Constraint(format!(
                "balance overflow on account {}",
                account_id
            )))
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn create_transfer(
        &mut self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: Cents,
    ) -> Result<Transfer, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO transfers (from_account_id, to_account_id, amount, created_at) VALUES (?, ?, ?, ?) RETURNING {TRANSFER_COLUMNS}"
        ))
        .bind(from_account_id)
        .bind(to_account_id)
        .bind(amount)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&mut *self.tx)
        .await?;

        row_to_transfer(&row)
    }

    async fn create_entry(
        &mut self,
        account_id: AccountId,
        amount: Cents,
    ) -> Result<Entry, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO entries (account_id, amount, created_at) VALUES (?, ?, ?) RETURNING {ENTRY_COLUMNS}"
        ))
        .bind(account_id)
        .bind(amount)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&mut *self.tx)
        .await?;

        row_to_entry(&row)
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Fatal(format!("Invalid {} timestamp '{}': {}", column, value, e)))
}

fn row_to_account(row: &SqliteRow) -> Result<Account, StoreError> {
    let currency_str: String = row.try_get("currency")?;
    let created_at_str: String = row.try_get("created_at")?;

    Ok(Account {
        id: row.try_get("id")?,
        owner: row.try_get("owner")?,
        balance: row.try_get("balance")?,
        currency: Currency::from_str(&currency_str)
            .map_err(|e| StoreError::Fatal(e.to_string()))?,
        created_at: parse_timestamp(&created_at_str, "created_at")?,
    })
}

fn row_to_entry(row: &SqliteRow) -> Result<Entry, StoreError> {
    let created_at_str: String = row.try_get("created_at")?;

    Ok(Entry {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        amount: row.try_get("amount")?,
        created_at: parse_timestamp(&created_at_str, "created_at")?,
    })
}

fn row_to_transfer(row: &SqliteRow) -> Result<Transfer, StoreError> {
    let created_at_str: String = row.try_get("created_at")?;

    Ok(Transfer {
        id: row.try_get("id")?,
        from_account_id: row.try_get("from_account_id")?,
        to_account_id: row.try_get("to_account_id")?,
        amount: row.try_get("amount")?,
        created_at: parse_timestamp(&created_at_str, "created_at")?,
    })
}
