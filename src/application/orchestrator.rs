//! Atomic funds transfer.
//!
//! A transfer debits the source, credits the destination, records the transfer
//! and one entry per account, all inside a single store transaction. Balance
//! rows are always updated lower account id first, whichever side of the
//! transfer that is, so two transfers over the same pair can never wait on
//! each other in a cycle.

use std::sync::Arc;

use tracing::Instrument;
use uuid::Uuid;

use crate::domain::{Account, AccountId, TransferOutcome, TransferRequest, lock_order};
use crate::storage::{LedgerStore, LedgerTx, StoreError};

use super::{RetryPolicy, TransferError};

pub struct TransferOrchestrator<S: LedgerStore> {
    store: Arc<S>,
    retry: RetryPolicy,
}

impl<S: LedgerStore> Clone for TransferOrchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            retry: self.retry.clone(),
        }
    }
}

impl<S: LedgerStore> TransferOrchestrator<S> {
    pub fn new(store: Arc<S>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Move `request.amount` from the source to the destination account.
    ///
    /// Not idempotent: every successful call records a new transfer.
    /// Transient store failures are retried per the [`RetryPolicy`]; once
    /// retries run out the call fails with [`TransferError::Unavailable`].
    pub async fn transfer(
        &self,
        request: TransferRequest,
    ) -> Result<TransferOutcome, TransferError> {
        validate(&request)?;

        let span = tracing::info_span!(
            "transfer",
            op_id = %Uuid::new_v4(),
            from = request.from_account_id,
            to = request.to_account_id,
            amount = request.amount,
        );
        self.run_with_retry(request).instrument(span).await
    }

    async fn run_with_retry(
        &self,
        request: TransferRequest,
    ) -> Result<TransferOutcome, TransferError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt(request).await {
                Ok(outcome) => {
                    tracing::info!(
                        transfer_id = outcome.transfer.id,
                        attempt,
                        "Transfer committed"
                    );
                    return Ok(outcome);
                }
                Err(err) if err.is_retryable() => {
                    if !self.retry.should_retry(attempt) {
                        tracing::warn!(attempt, error = %err, "Transfer retries exhausted");
                        return Err(match err {
                            TransferError::Store(source) => TransferError::Unavailable {
                                attempts: attempt,
                                source,
                            },
                            other => other,
                        });
                    }
                    let delay = self.retry.delay_after(attempt);
                    tracing::warn!(attempt, ?delay, error = %err, "Transient store failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    tracing::debug!(error = %err, "Transfer rejected");
                    return Err(err);
                }
            }
        }
    }

    async fn attempt(&self, request: TransferRequest) -> Result<TransferOutcome, TransferError> {
        // Existence is checked before a transaction is opened.
        self.ensure_exists(request.from_account_id).await?;
        self.ensure_exists(request.to_account_id).await?;

        let mut tx = self.store.begin().await?;
        match apply_transfer(&mut tx, &request).await {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn ensure_exists(&self, account_id: AccountId) -> Result<(), TransferError> {
        match self.store.get_account(account_id).await? {
            Some(_) => Ok(()),
            None => Err(TransferError::AccountNotFound(account_id)),
        }
    }
}

/// Input checks that need no store access.
pub(crate) fn validate(request: &TransferRequest) -> Result<(), TransferError> {
    if request.from_account_id == request.to_account_id {
        return Err(TransferError::SameAccount(request.from_account_id));
    }
    if request.amount <= 0 {
        return Err(TransferError::InvalidAmount(request.amount));
    }
    Ok(())
}

/// The five writes of one transfer, in lock order.
async fn apply_transfer<T: LedgerTx>(
    tx: &mut T,
    request: &TransferRequest,
) -> Result<TransferOutcome, TransferError> {
    let (first, second) = lock_order(request.from_account_id, request.to_account_id);
    let first_account = update_balance(tx, request, first).await?;
    let second_account = update_balance(tx, request, second).await?;

    let transfer = tx
        .create_transfer(
            request.from_account_id,
            request.to_account_id,
            request.amount,
        )
        .await?;
    let from_entry = tx
        .create_entry(request.from_account_id, -request.amount)
        .await?;
    let to_entry = tx.create_entry(request.to_account_id, request.amount).await?;

    let (from_account, to_account) = if first == request.from_account_id {
        (first_account, second_account)
    } else {
        (second_account, first_account)
    };

    Ok(TransferOutcome {
        transfer,
        from_entry,
        to_entry,
        from_account,
        to_account,
    })
}

/// Apply this transfer's delta to one account and reject a source that went negative.
async fn update_balance<T: LedgerTx>(
    tx: &mut T,
    request: &TransferRequest,
    account_id: AccountId,
) -> Result<Account, TransferError> {
    let delta = request.delta_for(account_id);
    let account = tx
        .add_account_balance(account_id, delta)
        .await
        .map_err(|err| match err {
            StoreError::NotFound => TransferError::AccountNotFound(account_id),
            other => TransferError::Store(other),
        })?;

    if account_id == request.from_account_id && account.balance < 0 {
        return Err(TransferError::InsufficientFunds {
            account_id,
            balance: account.balance - delta,
            required: request.amount,
        });
    }
    Ok(account)
}
