use crate::bus::{EventBus, Handler};
use crate::context::Context;
use crate::contracts::repository::{AccountUpdate, NewTransaction, TransactionUpdate};
use crate::entities::{Account, MoneySource, Transaction, TransactionStatus};
use crate::error::CoreError;
use crate::events::{
    CurrencyConversionRequested, DomainEvent, OriginalRequest, TransferPersisted,
    TransferRequested, TransferValidated,
};
use crate::handlers::{handle_precondition_error, validation};
use crate::uow::UnitOfWork;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Entry point of the transfer flow. A transfer moves funds between two
/// accounts the system itself holds, so unlike deposit/withdraw it never
/// reaches the external payment provider — both legs settle inside a
/// single unit of work once validated, with currency conversion the only
/// external collaborator involved.
pub struct HandleTransferRequested {
    uow: Arc<dyn UnitOfWork>,
    bus: EventBus,
}

impl HandleTransferRequested {
    pub fn new(uow: Arc<dyn UnitOfWork>, bus: EventBus) -> Self {
        Self { uow, bus }
    }
}

#[async_trait]
impl Handler for HandleTransferRequested {
    async fn handle(&self, ctx: &Context, event: &DomainEvent) -> Result<(), CoreError> {
        let DomainEvent::TransferRequested(req) = event else {
            return Err(CoreError::ProgrammerError(
                "HandleTransferRequested received a non-Transfer.Requested event".to_string(),
            ));
        };

        if req.from_account_id == req.to_account_id {
            return handle_precondition_error(
                &self.bus,
                ctx,
                &req.envelope,
                CoreError::InvalidRequest(
                    "transfer source and destination accounts must differ".to_string(),
                ),
            )
            .await;
        }

        if req.amount.is_zero() || req.amount.is_negative() {
            return handle_precondition_error(
                &self.bus,
                ctx,
                &req.envelope,
                CoreError::InvalidRequest(format!(
                    "transfer amount {} must be strictly positive",
                    req.amount
                )),
            )
            .await;
        }

        let user_id = req.envelope.user_id;
        let from_account_id = req.from_account_id;
        let to_account_id = req.to_account_id;
        let amount = req.amount;

        let outcome = Arc::new(Mutex::new(None));
        let outcome_inner = outcome.clone();

        let result = self
            .uow
            .do_in_scope(Box::new(move |scope| {
                Box::pin(async move {
                    let accounts = scope.accounts();
                    let from = accounts
                        .get(from_account_id)
                        .await?
                        .ok_or_else(|| CoreError::NotFound(format!("account {from_account_id}")))?;
                    from.check_owner(user_id)?;
                    let to = accounts
                        .get(to_account_id)
                        .await?
                        .ok_or_else(|| CoreError::NotFound(format!("account {to_account_id}")))?;

                    let transactions = scope.transactions();
                    let from_tx = persist_pending_leg(&*transactions, user_id, from_account_id, amount).await?;
                    let to_tx = persist_pending_leg(&*transactions, to.user_id, to_account_id, amount).await?;

                    *outcome_inner.lock().unwrap() = Some((from_tx, to_tx, from, to));
                    Ok(())
                })
            }))
            .await;

        if let Err(err) = result {
            return handle_precondition_error(&self.bus, ctx, &req.envelope, err).await;
        }

        let (from_tx, to_tx, from, to) =
            outcome.lock().unwrap().take().expect("scope set an outcome on Ok");
        let envelope = req.envelope.next().with_transaction_id(from_tx.id);

        self.bus
            .emit(
                ctx,
                DomainEvent::TransferPersisted(TransferPersisted {
                    envelope: envelope.clone(),
                    from_account_id,
                    to_account_id,
                    from_transaction_id: from_tx.id,
                    to_transaction_id: to_tx.id,
                    amount,
                }),
            )
            .await?;

        match validation::validate_transfer(user_id, &from, &to, &amount) {
            Ok(()) => {}
            Err(err) => return handle_precondition_error(&self.bus, ctx, &envelope, err).await,
        }

        if from.currency == to.currency {
            return self
                .bus
                .emit(
                    ctx,
                    DomainEvent::TransferValidated(TransferValidated {
                        envelope,
                        from_account_id,
                        to_account_id,
                        from_transaction_id: from_tx.id,
                        to_transaction_id: to_tx.id,
                        from_amount: amount,
                        amount,
                        via_conversion: false,
                    }),
                )
                .await;
        }

        self.bus
            .emit(
                ctx,
                DomainEvent::CurrencyConversionRequested(CurrencyConversionRequested {
                    envelope: envelope.clone(),
                    original_request: OriginalRequest::Transfer(req.clone()),
                    target_currency: to.currency,
                    to_transaction_id: Some(to_tx.id),
                }),
            )
            .await
    }
}

async fn persist_pending_leg(
    transactions: &dyn crate::contracts::repository::TransactionRepository,
    user_id: common::ids::UserId,
    account_id: common::ids::AccountId,
    amount: common::money::Money,
) -> Result<Transaction, CoreError> {
    let tx = transactions
        .create(NewTransaction {
            user_id,
            account_id,
            amount,
            money_source: MoneySource::InternalTransfer,
        })
        .await?;
    transactions
        .update(
            tx.id,
            TransactionUpdate {
                status: Some(TransactionStatus::Pending),
                ..Default::default()
            },
        )
        .await
}

/// Resolves a transfer's currency conversion, same as
/// `HandleDepositCurrencyConverted` / `HandleWithdrawCurrencyConverted` but
/// keyed on `Transfer.CurrencyConverted`, the only variant carrying both
/// legs' transaction ids back. An `original_request` that isn't a transfer
/// here is a wiring bug, not a routing choice.
pub struct HandleTransferCurrencyConverted {
    uow: Arc<dyn UnitOfWork>,
    bus: EventBus,
}

impl HandleTransferCurrencyConverted {
    pub fn new(uow: Arc<dyn UnitOfWork>, bus: EventBus) -> Self {
        Self { uow, bus }
    }
}

#[async_trait]
impl Handler for HandleTransferCurrencyConverted {
    async fn handle(&self, ctx: &Context, event: &DomainEvent) -> Result<(), CoreError> {
        let DomainEvent::TransferCurrencyConverted(e) = event else {
            return Err(CoreError::ProgrammerError(
                "HandleTransferCurrencyConverted received a non-Transfer.CurrencyConverted event"
                    .to_string(),
            ));
        };

        let OriginalRequest::Transfer(req) = &e.original_request else {
            return Err(CoreError::ProgrammerError(
                "Transfer.CurrencyConverted carried a non-transfer original request".to_string(),
            ));
        };

        let from_account_id = req.from_account_id;
        let to_account_id = req.to_account_id;
        let user_id = e.envelope.user_id;
        let from_amount = e.converted.original_amount;
        let converted_amount = e.converted.converted_amount;
        let from_transaction_id = e.from_transaction_id;
        let to_transaction_id = e.to_transaction_id;

        let outcome = Arc::new(Mutex::new(None));
        let outcome_inner = outcome.clone();

        let result = self
            .uow
            .do_in_scope(Box::new(move |scope| {
                Box::pin(async move {
                    let accounts = scope.accounts();
                    let from = accounts
                        .get(from_account_id)
                        .await?
                        .ok_or_else(|| CoreError::NotFound(format!("account {from_account_id}")))?;
                    let to = accounts
                        .get(to_account_id)
                        .await?
                        .ok_or_else(|| CoreError::NotFound(format!("account {to_account_id}")))?;
                    *outcome_inner.lock().unwrap() = Some((from, to));
                    Ok(())
                })
            }))
            .await;

        if let Err(err) = result {
            return handle_precondition_error(&self.bus, ctx, &e.envelope, err).await;
        }

        let (from, to) = outcome.lock().unwrap().take().expect("scope set an outcome on Ok");

        match validation::validate_transfer(user_id, &from, &to, &from_amount) {
            Ok(()) => {
                let envelope = e.envelope.next();
                self.bus
                    .emit(
                        ctx,
                        DomainEvent::TransferValidated(TransferValidated {
                            envelope,
                            from_account_id,
                            to_account_id,
                            from_transaction_id,
                            to_transaction_id,
                            from_amount,
                            amount: converted_amount,
                            via_conversion: true,
                        }),
                    )
                    .await
            }
            Err(err) => handle_precondition_error(&self.bus, ctx, &e.envelope, err).await,
        }
    }
}

/// Settles both legs atomically: debits `from`, credits `to`, and drives
/// both transactions straight from `pending` to `completed` — there's no
/// provider round trip to wait on for an internal transfer.
pub struct HandleTransferValidated {
    uow: Arc<dyn UnitOfWork>,
}

impl HandleTransferValidated {
    pub fn new(uow: Arc<dyn UnitOfWork>) -> Self {
        Self { uow }
    }
}

#[async_trait]
impl Handler for HandleTransferValidated {
    async fn handle(&self, _ctx: &Context, event: &DomainEvent) -> Result<(), CoreError> {
        let DomainEvent::TransferValidated(e) = event else {
            return Err(CoreError::ProgrammerError(
                "HandleTransferValidated received a non-Transfer.Validated event".to_string(),
            ));
        };

        let from_account_id = e.from_account_id;
        let to_account_id = e.to_account_id;
        let from_transaction_id = e.from_transaction_id;
        let to_transaction_id = e.to_transaction_id;
        let from_amount = e.from_amount;
        let amount = e.amount;

        self.uow
            .do_in_scope(Box::new(move |scope| {
                Box::pin(async move {
                    let accounts = scope.accounts();

                    let from = accounts
                        .get(from_account_id)
                        .await?
                        .ok_or_else(|| CoreError::NotFound(format!("account {from_account_id}")))?;
                    settle_leg(
                        &*accounts,
                        &*scope.transactions(),
                        from,
                        from_transaction_id,
                        Leg::Debit(from_amount),
                    )
                    .await?;

                    let to = accounts
                        .get(to_account_id)
                        .await?
                        .ok_or_else(|| CoreError::NotFound(format!("account {to_account_id}")))?;
                    settle_leg(
                        &*accounts,
                        &*scope.transactions(),
                        to,
                        to_transaction_id,
                        Leg::Credit(amount),
                    )
                    .await?;

                    Ok(())
                })
            }))
            .await
    }
}

enum Leg {
    Debit(common::money::Money),
    Credit(common::money::Money),
}

async fn settle_leg(
    accounts: &dyn crate::contracts::repository::AccountRepository,
    transactions: &dyn crate::contracts::repository::TransactionRepository,
    mut account: Account,
    transaction_id: common::ids::TransactionId,
    leg: Leg,
) -> Result<(), CoreError> {
    account.check_currency_invariant()?;
    let credited_amount = match leg {
        Leg::Debit(amount) => {
            account.debit(&amount)?;
            amount
        }
        Leg::Credit(amount) => {
            account.credit(&amount)?;
            amount
        }
    };

    accounts
        .update(
            account.id,
            AccountUpdate {
                balance: Some(account.balance),
                ..Default::default()
            },
        )
        .await?;

    transactions
        .update(
            transaction_id,
            TransactionUpdate {
                status: Some(TransactionStatus::Processed),
                amount: Some(credited_amount),
                ..Default::default()
            },
        )
        .await?;
    transactions
        .update(
            transaction_id,
            TransactionUpdate {
                status: Some(TransactionStatus::Completed),
                ..Default::default()
            },
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::events::{Envelope, FlowType};
    use crate::uow::in_memory::InMemoryUnitOfWork;
    use common::ids::{AccountId, UserId};
    use common::money::Money;

    fn account(currency: &str, balance: i64) -> Account {
        Account {
            id: AccountId::new(),
            user_id: UserId::new(),
            balance: Money::from_minor(balance, currency).unwrap(),
            currency: currency.to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            stripe_connect_account_id: None,
        }
    }

    fn wire_bus(uow: Arc<dyn UnitOfWork>) -> EventBus {
        let bus = EventBus::new();
        bus.register(
            "Transfer.Requested",
            Arc::new(HandleTransferRequested::new(uow.clone(), bus.clone())),
        );
        bus.register(
            "Transfer.Validated",
            Arc::new(HandleTransferValidated::new(uow.clone())),
        );
        bus
    }

    #[tokio::test]
    async fn same_currency_transfer_settles_both_legs() {
        let uow = InMemoryUnitOfWork::new();
        let from = account("USD", 100_000);
        let to = account("USD", 0);
        uow.seed_account(from.clone()).await;
        uow.seed_account(to.clone()).await;
        let uow_dyn: Arc<dyn UnitOfWork> = Arc::new(uow.clone());
        let bus = wire_bus(uow_dyn);

        let envelope = Envelope::root(FlowType::Transfer, from.user_id, from.id);
        let event = DomainEvent::TransferRequested(TransferRequested {
            envelope,
            from_account_id: from.id,
            to_account_id: to.id,
            amount: Money::from_minor(25_000, "USD").unwrap(),
        });

        bus.emit(&Context::new(), event).await.unwrap();

        let from_after = uow.get_account(from.id).await.unwrap();
        let to_after = uow.get_account(to.id).await.unwrap();
        assert_eq!(from_after.balance, Money::from_minor(75_000, "USD").unwrap());
        assert_eq!(to_after.balance, Money::from_minor(25_000, "USD").unwrap());
    }

    #[tokio::test]
    async fn cross_currency_transfer_debits_source_credits_destination_in_each_currency() {
        let uow = InMemoryUnitOfWork::new();
        let from = account("USD", 100_000);
        let to = account("EUR", 0);
        uow.seed_account(from.clone()).await;
        uow.seed_account(to.clone()).await;

        let mut from_tx = Transaction::new(
            from.user_id,
            from.id,
            Money::from_minor(10_000, "USD").unwrap(),
            MoneySource::InternalTransfer,
        );
        from_tx.status = TransactionStatus::Pending;
        let mut to_tx = Transaction::new(
            to.user_id,
            to.id,
            Money::from_minor(10_000, "USD").unwrap(),
            MoneySource::InternalTransfer,
        );
        to_tx.status = TransactionStatus::Pending;
        let from_transaction_id = from_tx.id;
        let to_transaction_id = to_tx.id;
        uow.seed_transaction(from_tx).await;
        uow.seed_transaction(to_tx).await;

        let uow_dyn: Arc<dyn UnitOfWork> = Arc::new(uow.clone());
        let bus = EventBus::new();
        bus.register(
            "Transfer.Validated",
            Arc::new(HandleTransferValidated::new(uow_dyn)),
        );

        let envelope = Envelope::root(FlowType::Transfer, from.user_id, from.id);
        let event = DomainEvent::TransferValidated(TransferValidated {
            envelope,
            from_account_id: from.id,
            to_account_id: to.id,
            from_transaction_id,
            to_transaction_id,
            from_amount: Money::from_minor(10_000, "USD").unwrap(),
            amount: Money::from_minor(9_100, "EUR").unwrap(),
            via_conversion: true,
        });

        bus.emit(&Context::new(), event).await.unwrap();

        let from_after = uow.get_account(from.id).await.unwrap();
        let to_after = uow.get_account(to.id).await.unwrap();
        assert_eq!(from_after.balance, Money::from_minor(90_000, "USD").unwrap());
        assert_eq!(to_after.balance, Money::from_minor(9_100, "EUR").unwrap());
    }

    #[tokio::test]
    async fn transfer_to_same_account_is_rejected() {
        let uow = InMemoryUnitOfWork::new();
        let acc = account("USD", 1_000);
        uow.seed_account(acc.clone()).await;
        let uow: Arc<dyn UnitOfWork> = Arc::new(uow);
        let bus = wire_bus(uow);

        let envelope = Envelope::root(FlowType::Transfer, acc.user_id, acc.id);
        let event = DomainEvent::TransferRequested(TransferRequested {
            envelope,
            from_account_id: acc.id,
            to_account_id: acc.id,
            amount: Money::from_minor(100, "USD").unwrap(),
        });

        let result = bus.emit(&Context::new(), event).await;
        assert!(result.is_ok());
    }
}
