mod common;

use anyhow::Result;
use bankledger::application::{AppError, ErrorKind, PageRequest, TransferCommand, TransferError};
use bankledger::domain::Currency;
use bankledger::storage::{LedgerStore, LedgerTx, Page, StoreError, TransferFilter};
use common::{StandardAccounts, funded_account, ledger_total, memory_service, test_service};

fn usd(from: i64, to: i64, amount: i64) -> TransferCommand {
    TransferCommand {
        from_account_id: from,
        to_account_id: to,
        amount,
        currency: Currency::Usd,
    }
}

#[tokio::test]
async fn test_transfer_updates_balances_and_records_entries() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let store = service.store().clone();
    let a = service.open_account("alice", Currency::Usd, 100).await?;
    let b = service.open_account("bob", Currency::Usd, 50).await?;

    let outcome = service.transfer("alice", usd(a.id, b.id, 30)).await?;

    assert_eq!(outcome.from_account.balance, 70);
    assert_eq!(outcome.to_account.balance, 80);
    assert_eq!(store.get_account(a.id).await?.unwrap().balance, 70);
    assert_eq!(store.get_account(b.id).await?.unwrap().balance, 80);

    let transfers = store
        .list_transfers(TransferFilter::touching(a.id), Page::default())
        .await?;
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0], outcome.transfer);

    let a_entries = store.list_entries(a.id, Page::default()).await?;
    let b_entries = store.list_entries(b.id, Page::default()).await?;
    assert_eq!(a_entries.len(), 1);
    assert_eq!(a_entries[0].amount, -30);
    assert!(a_entries[0].is_debit());
    assert_eq!(b_entries.len(), 1);
    assert_eq!(b_entries[0].amount, 30);
    assert!(!b_entries[0].is_debit());

    let entry = store.get_entry(outcome.from_entry.id).await?.unwrap();
    assert_eq!(entry, outcome.from_entry);
    let transfer = store.get_transfer(outcome.transfer.id).await?.unwrap();
    assert_eq!(transfer.from_account_id, a.id);
    assert_eq!(transfer.to_account_id, b.id);

    Ok(())
}

#[tokio::test]
async fn test_insufficient_funds_leaves_no_trace() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let store = service.store().clone();
    let a = service.open_account("alice", Currency::Usd, 10).await?;
    let b = service.open_account("bob", Currency::Usd, 50).await?;

    let err = service.transfer("alice", usd(a.id, b.id, 50)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
    assert!(matches!(
        err,
        AppError::Transfer(TransferError::InsufficientFunds { balance: 10, required: 50, .. })
    ));

    assert_eq!(store.get_account(a.id).await?.unwrap().balance, 10);
    assert_eq!(store.get_account(b.id).await?.unwrap().balance, 50);
    assert!(store.list_entries(a.id, Page::default()).await?.is_empty());
    assert!(store.list_entries(b.id, Page::default()).await?.is_empty());
    let stats = store.integrity_stats().await?;
    assert_eq!(stats.transfer_count, 0);
    assert_eq!(stats.entry_count, 0);

    Ok(())
}

#[tokio::test]
async fn test_same_account_is_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let a = service.open_account("alice", Currency::Usd, 100).await?;

    let err = service.transfer("alice", usd(a.id, a.id, 10)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(matches!(err, AppError::Transfer(TransferError::SameAccount(_))));

    Ok(())
}

#[tokio::test]
async fn test_non_positive_amount_is_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let accounts = StandardAccounts::create(&service).await?;

    for amount in [0, -100] {
        let err = service
            .transfer("alice", usd(accounts.alice.id, accounts.bob.id, amount))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    Ok(())
}

#[tokio::test]
async fn test_repeated_transfer_is_applied_twice() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let store = service.store().clone();
    let a = service.open_account("alice", Currency::Usd, 100).await?;
    let b = service.open_account("bob", Currency::Usd, 50).await?;

    service.transfer("alice", usd(a.id, b.id, 30)).await?;
    service.transfer("alice", usd(a.id, b.id, 30)).await?;

    assert_eq!(store.get_account(a.id).await?.unwrap().balance, 40);
    assert_eq!(store.get_account(b.id).await?.unwrap().balance, 110);
    let transfers = store
        .list_transfers(TransferFilter::touching(a.id), Page::default())
        .await?;
    assert_eq!(transfers.len(), 2);
    assert_ne!(transfers[0].id, transfers[1].id);

    Ok(())
}

#[tokio::test]
async fn test_balances_are_conserved_across_transfers() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let store = service.store().clone();
    let a = service.open_account("alice", Currency::Usd, 10_000).await?;
    let b = service.open_account("bob", Currency::Usd, 5_000).await?;
    let c = service.open_account("carol", Currency::Usd, 0).await?;
    let before = ledger_total(store.as_ref(), &[&a, &b, &c]).await?;

    service.transfer("alice", usd(a.id, b.id, 1_500)).await?;
    service.transfer("bob", usd(b.id, c.id, 4_000)).await?;
    service.transfer("carol", usd(c.id, a.id, 250)).await?;
    let _ = service.transfer("carol", usd(c.id, b.id, 1_000_000)).await;

    assert_eq!(ledger_total(store.as_ref(), &[&a, &b, &c]).await?, before);

    let report = service.check_integrity().await?;
    assert!(report.is_healthy(), "issues: {:?}", report.issues);
    assert_eq!(report.stats.transfer_count, 3);
    assert_eq!(report.stats.entry_count, 6);
    assert_eq!(report.stats.entry_sum, 0);

    Ok(())
}

#[tokio::test]
async fn test_entries_and_transfers_are_append_only() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let accounts = StandardAccounts::create(&service).await?;
    let outcome = service
        .transfer("alice", usd(accounts.alice.id, accounts.bob.id, 100))
        .await?;

    let pool = service.store().pool();
    let update = sqlx::query("UPDATE entries SET amount = 0 WHERE id = ?")
        .bind(outcome.from_entry.id)
        .execute(pool)
        .await;
    assert!(update.is_err());

    let delete = sqlx::query("DELETE FROM transfers WHERE id = ?")
        .bind(outcome.transfer.id)
        .execute(pool)
        .await;
    assert!(delete.is_err());

    Ok(())
}

#[tokio::test]
async fn test_listing_transfers_and_entries_is_paginated() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let accounts = StandardAccounts::create(&service).await?;
    let (alice, bob) = (accounts.alice.id, accounts.bob.id);

    for _ in 0..5 {
        service.transfer("alice", usd(alice, bob, 10)).await?;
        service.transfer("bob", usd(bob, alice, 10)).await?;
    }

    let first = service
        .list_transfers("alice", alice, PageRequest::new(1, 5))
        .await?;
    let second = service
        .list_transfers("alice", alice, PageRequest::new(2, 5))
        .await?;
    let third = service
        .list_transfers("alice", alice, PageRequest::new(3, 5))
        .await?;
    assert_eq!(first.len(), 5);
    assert_eq!(second.len(), 5);
    assert!(third.is_empty());
    assert!(
        first
            .iter()
            .chain(&second)
            .all(|t| t.from_account_id == alice || t.to_account_id == alice)
    );
    assert!(first.last().unwrap().id < second[0].id);

    let entries = service
        .list_entries("bob", bob, PageRequest::new(2, 5))
        .await?;
    assert_eq!(entries.len(), 5);
    assert!(entries.iter().all(|e| e.account_id == bob));

    Ok(())
}

async fn assert_overflow_is_constraint<S: LedgerStore>(store: &S) -> Result<()> {
    let full = funded_account(store, "whale", i64::MAX - 5).await?;
    let empty = funded_account(store, "minnow", 0).await?;

    let mut tx = store.begin().await?;
    let err = tx.add_account_balance(full.id, 10).await.unwrap_err();
    assert!(matches!(err, StoreError::Constraint(_)), "got {err:?}");
    drop(tx);

    let mut tx = store.begin().await?;
    assert_eq!(tx.add_account_balance(empty.id, i64::MIN).await?.balance, i64::MIN);
    let err = tx.add_account_balance(empty.id, -1).await.unwrap_err();
    assert!(matches!(err, StoreError::Constraint(_)), "got {err:?}");
    assert_eq!(tx.add_account_balance(9_999, 1).await.unwrap_err(), StoreError::NotFound);
    drop(tx);

    assert_eq!(store.get_account(full.id).await?.unwrap().balance, i64::MAX - 5);
    assert_eq!(store.get_account(empty.id).await?.unwrap().balance, 0);
    Ok(())
}

#[tokio::test]
async fn test_balance_overflow_is_a_constraint_violation() -> Result<()> {
    let (service, _temp) = test_service().await?;
    assert_overflow_is_constraint(service.store().as_ref()).await?;

    let memory = memory_service();
    assert_overflow_is_constraint(memory.store().as_ref()).await?;

    Ok(())
}
