use crate::bus::{EventBus, Handler};
use crate::context::Context;
use crate::contracts::payment_provider::{InitiatePaymentRequest, PaymentProvider};
use crate::contracts::repository::{NewTransaction, TransactionUpdate};
use crate::entities::{MoneySource, TransactionStatus};
use crate::error::CoreError;
use crate::events::{DomainEvent, FlowType};
use crate::handlers::failed_event_for;
use crate::helpers::{find_transaction_by_payment_or_id, require};
use crate::uow::UnitOfWork;
use async_trait::async_trait;
use std::sync::Arc;

/// Calls the payment provider to kick off a charge. This handler touches
/// no repository: the provider drives `Payment.Processed` asynchronously
/// once it has an outcome, so there's nothing local to persist here
/// beyond the call itself.
pub struct HandlePaymentInitiated {
    provider: Arc<dyn PaymentProvider>,
    bus: EventBus,
}

impl HandlePaymentInitiated {
    pub fn new(provider: Arc<dyn PaymentProvider>, bus: EventBus) -> Self {
        Self { provider, bus }
    }
}

#[async_trait]
impl Handler for HandlePaymentInitiated {
    async fn handle(&self, ctx: &Context, event: &DomainEvent) -> Result<(), CoreError> {
        let DomainEvent::PaymentInitiated(e) = event else {
            return Err(CoreError::ProgrammerError(
                "HandlePaymentInitiated received a non-Payment.Initiated event".to_string(),
            ));
        };

        let transaction_id = require(e.envelope.transaction_id, "transaction id on Payment.Initiated")?;

        let request = InitiatePaymentRequest {
            user_id: e.envelope.user_id,
            account_id: e.envelope.account_id,
            amount: e.amount,
            transaction_id,
        };

        match self.provider.initiate_payment(ctx, request).await {
            Ok(_) => Ok(()),
            Err(err) => {
                self.bus
                    .emit(ctx, failed_event_for(&e.envelope, err.to_string()))
                    .await?;
                Err(err)
            }
        }
    }
}

/// Binds the provider's acknowledgement to a transaction. Locates the row
/// by `transaction_id` first, falling back to `payment_id`, and transitions
/// it `pending -> processed`. A miss means the webhook arrived for a
/// transaction this process never persisted locally: if the webhook
/// carried an amount, upserts a `processed` row by `payment_id` instead;
/// otherwise there's nothing to build a row from, so it's an idempotent
/// skip rather than an error.
pub struct HandlePaymentProcessed {
    uow: Arc<dyn UnitOfWork>,
}

impl HandlePaymentProcessed {
    pub fn new(uow: Arc<dyn UnitOfWork>) -> Self {
        Self { uow }
    }
}

#[async_trait]
impl Handler for HandlePaymentProcessed {
    async fn handle(&self, _ctx: &Context, event: &DomainEvent) -> Result<(), CoreError> {
        let DomainEvent::PaymentProcessed(e) = event else {
            return Err(CoreError::ProgrammerError(
                "HandlePaymentProcessed received a non-Payment.Processed event".to_string(),
            ));
        };

        let transaction_id = e.envelope.transaction_id;
        let payment_id = require(e.payment_id, "payment id on Payment.Processed")?;
        let amount = e.amount;
        let user_id = e.envelope.user_id;
        let account_id = e.envelope.account_id;
        let flow_type = e.envelope.flow_type;

        self.uow
            .do_in_scope(Box::new(move |scope| {
                Box::pin(async move {
                    let transactions = scope.transactions();
                    let tx = match find_transaction_by_payment_or_id(
                        &transactions,
                        transaction_id,
                        Some(payment_id),
                    )
                    .await
                    {
                        Ok(tx) => tx,
                        Err(err) if err.is_not_found() => {
                            let Some(amount) = amount else {
                                return Ok(());
                            };
                            let money_source = match flow_type {
                                FlowType::Withdraw => MoneySource::BankTransfer,
                                _ => MoneySource::Card,
                            };
                            transactions
                                .upsert_by_payment_id(
                                    payment_id,
                                    NewTransaction {
                                        user_id,
                                        account_id,
                                        amount,
                                        money_source,
                                    },
                                    TransactionStatus::Processed,
                                )
                                .await?;
                            return Ok(());
                        }
                        Err(err) => return Err(err),
                    };

                    transactions
                        .update(
                            tx.id,
                            TransactionUpdate {
                                status: Some(TransactionStatus::Processed),
                                payment_id: Some(Some(payment_id)),
                                ..Default::default()
                            },
                        )
                        .await?;
                    Ok(())
                })
            }))
            .await
    }
}

#[cfg(test)]
mod payment_processed_tests {
    use super::*;
    use crate::events::{Envelope, FlowType, PaymentProcessed};
    use crate::uow::in_memory::InMemoryUnitOfWork;
    use common::ids::{AccountId, PaymentId, UserId};
    use common::money::Money;

    #[tokio::test]
    async fn miss_with_amount_upserts_a_processed_transaction() {
        let uow = InMemoryUnitOfWork::new();
        let user_id = UserId::new();
        let account_id = AccountId::new();
        let payment_id = PaymentId::new();
        let uow_dyn: Arc<dyn UnitOfWork> = Arc::new(uow.clone());

        let envelope = Envelope::root(FlowType::Deposit, user_id, account_id);
        let event = DomainEvent::PaymentProcessed(PaymentProcessed {
            envelope,
            payment_id: Some(payment_id),
            amount: Some(Money::from_minor(5_000, "USD").unwrap()),
        });

        let handler = HandlePaymentProcessed::new(uow_dyn);
        handler.handle(&Context::new(), &event).await.unwrap();

        let tx = uow.get_transaction_by_payment_id(payment_id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Processed);
        assert_eq!(tx.payment_id, Some(payment_id));
        assert_eq!(tx.amount, Money::from_minor(5_000, "USD").unwrap());
    }

    #[tokio::test]
    async fn miss_without_amount_is_an_idempotent_skip() {
        let uow = InMemoryUnitOfWork::new();
        let user_id = UserId::new();
        let account_id = AccountId::new();
        let payment_id = PaymentId::new();
        let uow_dyn: Arc<dyn UnitOfWork> = Arc::new(uow.clone());

        let envelope = Envelope::root(FlowType::Deposit, user_id, account_id);
        let event = DomainEvent::PaymentProcessed(PaymentProcessed {
            envelope,
            payment_id: Some(payment_id),
            amount: None,
        });

        let handler = HandlePaymentProcessed::new(uow_dyn);
        assert!(handler.handle(&Context::new(), &event).await.is_ok());
        assert!(uow.get_transaction_by_payment_id(payment_id).await.is_none());
    }
}

/// Terminal success: mutates the account balance and marks the
/// transaction completed. Credits for deposits, debits for withdrawals
/// (read off `envelope.flow_type`, since this handler is shared). A miss
/// by both `transaction_id` and `payment_id` is treated as an idempotent
/// skip rather than an error.
pub struct HandlePaymentCompleted {
    uow: Arc<dyn UnitOfWork>,
    bus: EventBus,
}

impl HandlePaymentCompleted {
    pub fn new(uow: Arc<dyn UnitOfWork>, bus: EventBus) -> Self {
        Self { uow, bus }
    }
}

#[async_trait]
impl Handler for HandlePaymentCompleted {
    async fn handle(&self, ctx: &Context, event: &DomainEvent) -> Result<(), CoreError> {
        let DomainEvent::PaymentCompleted(e) = event else {
            return Err(CoreError::ProgrammerError(
                "HandlePaymentCompleted received a non-Payment.Completed event".to_string(),
            ));
        };

        let transaction_id = e.envelope.transaction_id;
        let payment_id = e.payment_id;
        let amount = e.amount;
        let fee = e.fee;
        let flow_type = e.envelope.flow_type;

        let outcome = std::sync::Arc::new(std::sync::Mutex::new(None));
        let outcome_inner = outcome.clone();

        let result = self
            .uow
            .do_in_scope(Box::new(move |scope| {
                Box::pin(async move {
                    let transactions = scope.transactions();
                    let tx = match find_transaction_by_payment_or_id(
                        &transactions,
                        transaction_id,
                        payment_id,
                    )
                    .await
                    {
                        Ok(tx) => tx,
                        Err(err) if err.is_not_found() => return Ok(()),
                        Err(err) => return Err(err),
                    };

                    if let Some(incoming) = payment_id {
                        // assign_payment_id is idempotent; a mismatched id is
                        // an invariant violation surfaced by the repository.
                        let mut snapshot = tx.clone();
                        snapshot.assign_payment_id(incoming)?;
                    }

                    let accounts = scope.accounts();
                    let account = accounts
                        .get(tx.account_id)
                        .await?
                        .ok_or_else(|| CoreError::NotFound(format!("account {}", tx.account_id)))?;
                    account.check_currency_invariant()?;

                    let mut mutated = account.clone();
                    match flow_type {
                        crate::events::FlowType::Withdraw => mutated.debit(&amount)?,
                        _ => mutated.credit(&amount)?,
                    }

                    let updated_account = accounts
                        .update(
                            account.id,
                            crate::contracts::repository::AccountUpdate {
                                balance: Some(mutated.balance),
                                ..Default::default()
                            },
                        )
                        .await?;

                    let updated_tx = transactions
                        .update(
                            tx.id,
                            TransactionUpdate {
                                status: Some(TransactionStatus::Completed),
                                payment_id: Some(payment_id.or(tx.payment_id)),
                                amount: Some(amount),
                                ..Default::default()
                            },
                        )
                        .await?;

                    *outcome_inner.lock().unwrap() = Some(updated_tx.clone());
                    let _ = updated_account;
                    Ok(())
                })
            }))
            .await;

        result?;

        let Some(tx) = outcome.lock().unwrap().take() else {
            return Ok(());
        };

        if let Some(fee) = fee {
            self.bus
                .emit(
                    ctx,
                    DomainEvent::FeesCalculated(crate::events::FeesCalculated {
                        envelope: e.envelope.next().with_transaction_id(tx.id),
                        fee,
                    }),
                )
                .await?;
        }

        Ok(())
    }
}

/// Records a terminal failure reported by the provider/webhook.
pub struct HandlePaymentFailed {
    uow: Arc<dyn UnitOfWork>,
}

impl HandlePaymentFailed {
    pub fn new(uow: Arc<dyn UnitOfWork>) -> Self {
        Self { uow }
    }
}

#[async_trait]
impl Handler for HandlePaymentFailed {
    async fn handle(&self, _ctx: &Context, event: &DomainEvent) -> Result<(), CoreError> {
        let DomainEvent::PaymentFailed(e) = event else {
            return Err(CoreError::ProgrammerError(
                "HandlePaymentFailed received a non-Payment.Failed event".to_string(),
            ));
        };

        let transaction_id = e.envelope.transaction_id;
        let payment_id = e.payment_id;

        self.uow
            .do_in_scope(Box::new(move |scope| {
                Box::pin(async move {
                    let transactions = scope.transactions();
                    let tx = match find_transaction_by_payment_or_id(
                        &transactions,
                        transaction_id,
                        payment_id,
                    )
                    .await
                    {
                        Ok(tx) => tx,
                        Err(err) if err.is_not_found() => return Ok(()),
                        Err(err) => return Err(err),
                    };

                    transactions
                        .update(
                            tx.id,
                            TransactionUpdate {
                                status: Some(TransactionStatus::Failed),
                                payment_id: Some(payment_id.or(tx.payment_id)),
                                ..Default::default()
                            },
                        )
                        .await?;
                    Ok(())
                })
            }))
            .await
    }
}
