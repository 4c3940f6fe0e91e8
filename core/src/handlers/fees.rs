use crate::bus::Handler;
use crate::context::Context;
use crate::contracts::repository::{AccountUpdate, TransactionUpdate};
use crate::error::CoreError;
use crate::events::DomainEvent;
use crate::helpers::require;
use crate::uow::UnitOfWork;
use async_trait::async_trait;
use std::sync::Arc;

/// Applies a provider fee reported on `Fees.Calculated`. Accumulates onto
/// any fee already on the transaction, then debits the account by the new
/// fee alone (the old fee was already debited when it was recorded). Both
/// mutations happen in one UoW so a failure rolls back the whole thing.
pub struct HandleFeesCalculated {
    uow: Arc<dyn UnitOfWork>,
}

impl HandleFeesCalculated {
    pub fn new(uow: Arc<dyn UnitOfWork>) -> Self {
        Self { uow }
    }
}

#[async_trait]
impl Handler for HandleFeesCalculated {
    async fn handle(&self, _ctx: &Context, event: &DomainEvent) -> Result<(), CoreError> {
        let DomainEvent::FeesCalculated(e) = event else {
            return Err(CoreError::ProgrammerError(
                "HandleFeesCalculated received a non-Fees.Calculated event".to_string(),
            ));
        };

        let transaction_id = require(e.envelope.transaction_id, "transaction id on Fees.Calculated")?;
        let new_fee = e.fee;

        self.uow
            .do_in_scope(Box::new(move |scope| {
                Box::pin(async move {
                    let transactions = scope.transactions();
                    let tx = transactions
                        .get(transaction_id)
                        .await?
                        .ok_or_else(|| CoreError::NotFound(format!("transaction {transaction_id}")))?;

                    let total_fee = match tx.fee {
                        Some(existing) => {
                            if existing.currency() != new_fee.currency() {
                                return Err(CoreError::InvariantViolation(format!(
                                    "fee currency {} does not match existing fee currency {} on transaction {}",
                                    new_fee.currency(),
                                    existing.currency(),
                                    tx.id
                                )));
                            }
                            existing.add(&new_fee)?
                        }
                        None => new_fee,
                    };

                    transactions
                        .update(
                            tx.id,
                            TransactionUpdate {
                                fee: Some(Some(total_fee)),
                                ..Default::default()
                            },
                        )
                        .await?;

                    let accounts = scope.accounts();
                    let mut account = accounts
                        .get(tx.account_id)
                        .await?
                        .ok_or_else(|| CoreError::NotFound(format!("account {}", tx.account_id)))?;

                    if new_fee.currency() != account.currency {
                        return Err(CoreError::InvariantViolation(format!(
                            "fee currency {} does not match account currency {} on account {}",
                            new_fee.currency(),
                            account.currency,
                            account.id
                        )));
                    }

                    account.debit(&new_fee)?;

                    accounts
                        .update(
                            account.id,
                            AccountUpdate {
                                balance: Some(account.balance),
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
mod tests {
    use super::*;
    use crate::entities::{Account, MoneySource, Transaction};
    use crate::events::{Envelope, FeesCalculated, FlowType};
    use crate::uow::in_memory::InMemoryUnitOfWork;
    use common::ids::{AccountId, UserId};
    use common::money::Money;

    fn account(balance: i64) -> Account {
        Account {
            id: AccountId::new(),
            user_id: UserId::new(),
            balance: Money::from_minor(balance, "USD").unwrap(),
            currency: "USD".to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            stripe_connect_account_id: None,
        }
    }

    #[tokio::test]
    async fn accumulates_fee_and_debits_account_once() {
        let uow = InMemoryUnitOfWork::new();
        let acc = account(109_900);
        uow.seed_account(acc.clone()).await;

        let mut tx = Transaction::new(
            acc.user_id,
            acc.id,
            Money::from_minor(10_000, "USD").unwrap(),
            MoneySource::Card,
        );
        tx.fee = Some(Money::from_minor(100, "USD").unwrap());
        let tx_id = tx.id;
        uow.seed_transaction(tx).await;

        let handler = HandleFeesCalculated::new(Arc::new(uow.clone()));
        let envelope = Envelope::root(FlowType::Payment, acc.user_id, acc.id).with_transaction_id(tx_id);
        let event = DomainEvent::FeesCalculated(FeesCalculated {
            envelope,
            fee: Money::from_minor(50, "USD").unwrap(),
        });

        handler.handle(&Context::new(), &event).await.unwrap();

        let after = uow.get_account(acc.id).await.unwrap();
        assert_eq!(after.balance, Money::from_minor(109_850, "USD").unwrap());

        let tx_after = uow.get_transaction(tx_id).await.unwrap();
        assert_eq!(tx_after.fee, Some(Money::from_minor(150, "USD").unwrap()));
    }

    #[tokio::test]
    async fn mismatched_fee_currency_is_rejected() {
        let uow = InMemoryUnitOfWork::new();
        let acc = account(10_000);
        uow.seed_account(acc.clone()).await;

        let tx = Transaction::new(
            acc.user_id,
            acc.id,
            Money::from_minor(10_000, "USD").unwrap(),
            MoneySource::Card,
        );
        let tx_id = tx.id;
        uow.seed_transaction(tx).await;

        let handler = HandleFeesCalculated::new(Arc::new(uow.clone()));
        let envelope = Envelope::root(FlowType::Payment, acc.user_id, acc.id).with_transaction_id(tx_id);
        let event = DomainEvent::FeesCalculated(FeesCalculated {
            envelope,
            fee: Money::from_minor(50, "EUR").unwrap(),
        });

        let result = handler.handle(&Context::new(), &event).await;
        assert!(matches!(result, Err(CoreError::InvariantViolation(_))));
    }
}
