use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::application::{LedgerService, PageRequest, RetryPolicy, TransferCommand};
use crate::domain::{AccountId, Currency, TransferId, format_cents, parse_cents};
use crate::storage::{SqliteStore, StoreConfig};

/// bankledger - ledger-backed accounts and atomic transfers
#[derive(Parser)]
#[command(name = "bankledger")]
#[command(about = "Ledger-backed bank accounts with atomic, auditable transfers")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "BANKLEDGER_DATABASE", default_value = "bankledger.db")]
    pub database: String,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Print results as JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Attempts per transfer when the database reports contention
    #[arg(long, env = "BANKLEDGER_MAX_ATTEMPTS", default_value_t = 5)]
    pub max_attempts: u32,

    /// How long a write waits on a locked database (milliseconds)
    #[arg(long, env = "BANKLEDGER_BUSY_TIMEOUT_MS", default_value_t = 5000)]
    pub busy_timeout_ms: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Account management commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Transfer funds between two accounts
    Transfer {
        /// Amount to transfer (e.g., "50.00" or "50")
        amount: String,

        /// Source account id
        #[arg(long)]
        from: AccountId,

        /// Destination account id
        #[arg(long)]
        to: AccountId,

        /// Currency both accounts hold (USD, EUR, CAD)
        #[arg(short, long)]
        currency: String,

        /// Acting user (must own the source account)
        #[arg(long = "as")]
        principal: String,
    },

    /// List entries of an account
    Entries {
        /// Account id
        account: AccountId,

        #[arg(long = "as")]
        principal: String,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 10)]
        size: u32,
    },

    /// List transfers into or out of an account
    Transfers {
        /// Account id
        account: AccountId,

        #[arg(long = "as")]
        principal: String,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 10)]
        size: u32,
    },

    /// Show a transfer
    Show {
        /// Transfer id
        id: TransferId,

        #[arg(long = "as")]
        principal: String,
    },

    /// Verify ledger integrity
    Check,
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Open a new account
    Open {
        /// Owning user
        #[arg(long)]
        owner: String,

        /// Currency code: USD, EUR, CAD
        #[arg(short, long)]
        currency: String,

        /// Opening balance (e.g., "100.00")
        #[arg(short, long, default_value = "0")]
        balance: String,
    },

    /// Show account details
    Show {
        id: AccountId,

        #[arg(long = "as")]
        principal: String,
    },

    /// List a user's accounts
    List {
        #[arg(long = "as")]
        principal: String,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 10)]
        size: u32,
    },
}

impl Cli {
    fn store_config(&self) -> StoreConfig {
        StoreConfig {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            ..StoreConfig::default()
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            ..RetryPolicy::default()
        }
    }

    pub async fn run(self) -> Result<()> {
        let config = self.store_config();
        let retry = self.retry_policy();

        if matches!(self.command, Commands::Init) {
            LedgerService::init(&self.database, &config, retry).await?;
            println!("Database initialized: {}", self.database);
            return Ok(());
        }

        let service = LedgerService::connect(&self.database, &config, retry).await?;
        let json = self.json;

        match self.command {
            Commands::Init => {}

            Commands::Account(cmd) => run_account_command(&service, cmd, json).await?,

            Commands::Transfer {
                amount,
                from,
                to,
                currency,
                principal,
            } => {
                let amount =
                    parse_cents(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
                let currency = parse_currency(&currency)?;

                let outcome = service
                    .transfer(
                        &principal,
                        TransferCommand {
                            from_account_id: from,
                            to_account_id: to,
                            amount,
                            currency,
                        },
                    )
                    .await?;

                if json {
                    print_json(&outcome)?;
                } else {
                    println!(
                        "Transferred {} {}: {} -> {} (transfer {})",
                        format_cents(outcome.transfer.amount),
                        currency,
                        outcome.from_account.id,
                        outcome.to_account.id,
                        outcome.transfer.id
                    );
                    println!(
                        "  Account {} balance: {}",
                        outcome.from_account.id,
                        format_cents(outcome.from_account.balance)
                    );
                }
            }

            Commands::Entries {
                account,
                principal,
                page,
                size,
            } => {
                let entries = service
                    .list_entries(&principal, account, PageRequest::new(page, size))
                    .await?;
                if json {
                    print_json(&entries)?;
                } else if entries.is_empty() {
                    println!("No entries found.");
                } else {
                    println!("{:<8} {:>14}  {}", "ID", "AMOUNT", "DATE");
                    println!("{}", "-".repeat(44));
                    for entry in entries {
                        println!(
                            "{:<8} {:>14}  {}",
                            entry.id,
                            format_cents(entry.amount),
                            entry.created_at.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }
            }

            Commands::Transfers {
                account,
                principal,
                page,
                size,
            } => {
                let transfers = service
                    .list_transfers(&principal, account, PageRequest::new(page, size))
                    .await?;
                if json {
                    print_json(&transfers)?;
                } else if transfers.is_empty() {
                    println!("No transfers found.");
                } else {
                    println!(
                        "{:<8} {:>8} {:>8} {:>14}  {}",
                        "ID", "FROM", "TO", "AMOUNT", "DATE"
                    );
                    println!("{}", "-".repeat(62));
                    for transfer in transfers {
                        println!(
                            "{:<8} {:>8} {:>8} {:>14}  {}",
                            transfer.id,
                            transfer.from_account_id,
                            transfer.to_account_id,
                            format_cents(transfer.amount),
                            transfer.created_at.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }
            }

            Commands::Show { id, principal } => {
                let transfer = service.get_transfer(&principal, id).await?;
                if json {
                    print_json(&transfer)?;
                } else {
                    println!("Transfer: {}", transfer.id);
                    println!("  From:    {}", transfer.from_account_id);
                    println!("  To:      {}", transfer.to_account_id);
                    println!("  Amount:  {}", format_cents(transfer.amount));
                    println!(
                        "  Date:    {}",
                        transfer.created_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }

            Commands::Check => run_check_command(&service, json).await?,
        }

        Ok(())
    }
}

async fn run_account_command(
    service: &LedgerService<SqliteStore>,
    cmd: AccountCommands,
    json: bool,
) -> Result<()> {
    match cmd {
        AccountCommands::Open {
            owner,
            currency,
            balance,
        } => {
            let currency = parse_currency(&currency)?;
            let balance = parse_cents(&balance).context("Invalid opening balance")?;
            let account = service.open_account(&owner, currency, balance).await?;
            if json {
                print_json(&account)?;
            } else {
                println!(
                    "Opened account {} for {} ({} {})",
                    account.id,
                    account.owner,
                    format_cents(account.balance),
                    account.currency
                );
            }
        }

        AccountCommands::Show { id, principal } => {
            let account = service.get_account(&principal, id).await?;
            if json {
                print_json(&account)?;
            } else {
                println!("Account: {}", account.id);
                println!("  Owner:    {}", account.owner);
                println!("  Currency: {}", account.currency);
                println!("  Balance:  {}", format_cents(account.balance));
                println!(
                    "  Created:  {}",
                    account.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }

        AccountCommands::List {
            principal,
            page,
            size,
        } => {
            let accounts = service
                .list_accounts(&principal, PageRequest::new(page, size))
                .await?;
            if json {
                print_json(&accounts)?;
            } else if accounts.is_empty() {
                println!("No accounts found.");
            } else {
                println!("{:<8} {:<8} {:>14}", "ID", "CURRENCY", "BALANCE");
                println!("{}", "-".repeat(32));
                for account in accounts {
                    println!(
                        "{:<8} {:<8} {:>14}",
                        account.id,
                        account.currency,
                        format_cents(account.balance)
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run_check_command(service: &LedgerService<SqliteStore>, json: bool) -> Result<()> {
    let report = service.check_integrity().await?;

    if json {
        print_json(&report)?;
    } else {
        println!("Checking ledger integrity...\n");
        println!("Accounts:  {}", report.stats.account_count);
        println!("Transfers: {}", report.stats.transfer_count);
        println!("Entries:   {}", report.stats.entry_count);
        println!();

        if report.is_healthy() {
            println!("Ledger is consistent.");
        } else {
            println!("Issues found:");
            for issue in &report.issues {
                println!("  - {}", issue);
            }
        }
    }

    if !report.is_healthy() {
        anyhow::bail!("Ledger integrity check failed");
    }
    Ok(())
}

fn parse_currency(code: &str) -> Result<Currency> {
    code.parse::<Currency>()
        .with_context(|| format!("Invalid currency '{}'. Valid currencies: USD, EUR, CAD", code))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
