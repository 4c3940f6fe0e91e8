use crate::bus::{EventBus, Handler};
use crate::context::Context;
use crate::contracts::repository::{NewTransaction, TransactionUpdate};
use crate::entities::TransactionStatus;
use crate::entities::MoneySource;
use crate::error::CoreError;
use crate::events::{
    CurrencyConversionRequested, DepositCurrencyConverted, DepositRequested, DepositValidated,
    DomainEvent, OriginalRequest, PaymentInitiated,
};
use crate::handlers::{handle_precondition_error, validation};
use crate::uow::UnitOfWork;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Entry point of the deposit flow. Persists a `created` transaction,
/// then either routes through currency conversion (different currencies)
/// or validates and emits `Deposit.Validated` directly (same currency).
pub struct HandleDepositRequested {
    uow: Arc<dyn UnitOfWork>,
    bus: EventBus,
}

impl HandleDepositRequested {
    pub fn new(uow: Arc<dyn UnitOfWork>, bus: EventBus) -> Self {
        Self { uow, bus }
    }
}

#[async_trait]
impl Handler for HandleDepositRequested {
    async fn handle(&self, ctx: &Context, event: &DomainEvent) -> Result<(), CoreError> {
        let DomainEvent::DepositRequested(req) = event else {
            return Err(CoreError::ProgrammerError(
                "HandleDepositRequested received a non-Deposit.Requested event".to_string(),
            ));
        };

        if req.amount.is_zero() || req.amount.is_negative() {
            return handle_precondition_error(
                &self.bus,
                ctx,
                &req.envelope,
                CoreError::InvalidRequest(format!(
                    "deposit amount {} must be strictly positive",
                    req.amount
                )),
            )
            .await;
        }

        let account_id = req.envelope.account_id;
        let user_id = req.envelope.user_id;
        let amount = req.amount;

        let outcome = Arc::new(Mutex::new(None));
        let outcome_inner = outcome.clone();

        let result = self
            .uow
            .do_in_scope(Box::new(move |scope| {
                Box::pin(async move {
                    let account = scope
                        .accounts()
                        .get(account_id)
                        .await?
                        .ok_or_else(|| CoreError::NotFound(format!("account {account_id}")))?;
                    account.check_owner(user_id)?;

                    let tx = scope
                        .transactions()
                        .create(NewTransaction {
                            user_id,
                            account_id,
                            amount,
                            money_source: MoneySource::Card,
                        })
                        .await?;
                    // A transaction is "pending" for the entire window between
                    // persistence and a processed/failed payment outcome.
                    let tx = scope
                        .transactions()
                        .update(
                            tx.id,
                            TransactionUpdate {
                                status: Some(TransactionStatus::Pending),
                                ..Default::default()
                            },
                        )
                        .await?;

                    *outcome_inner.lock().unwrap() = Some((tx, account));
                    Ok(())
                })
            }))
            .await;

        if let Err(err) = result {
            return handle_precondition_error(&self.bus, ctx, &req.envelope, err).await;
        }

        let (tx, account) = outcome.lock().unwrap().take().expect("scope set an outcome on Ok");
        let envelope = req.envelope.next().with_transaction_id(tx.id);

        self.bus
            .emit(
                ctx,
                DomainEvent::DepositPersisted(crate::events::DepositPersisted {
                    envelope: envelope.clone(),
                    amount,
                }),
            )
            .await?;

        if amount.currency() == account.currency {
            return match validation::validate_deposit(user_id, &account, &amount) {
                Ok(()) => {
                    self.bus
                        .emit(
                            ctx,
                            DomainEvent::DepositValidated(DepositValidated {
                                envelope,
                                amount,
                                via_conversion: false,
                            }),
                        )
                        .await
                }
                Err(err) => handle_precondition_error(&self.bus, ctx, &envelope, err).await,
            };
        }

        self.bus
            .emit(
                ctx,
                DomainEvent::CurrencyConversionRequested(CurrencyConversionRequested {
                    envelope: envelope.clone(),
                    original_request: OriginalRequest::Deposit(req.clone()),
                    target_currency: account.currency,
                    to_transaction_id: None,
                }),
            )
            .await
    }
}

/// Runs after an external FX quote comes back. Revalidates the converted
/// amount against the account and, on success, is the single emitter of
/// `Payment.Initiated` for the cross-currency path (see
/// `handlers::deposit::HandleDepositValidated`).
pub struct HandleDepositCurrencyConverted {
    uow: Arc<dyn UnitOfWork>,
    bus: EventBus,
}

impl HandleDepositCurrencyConverted {
    pub fn new(uow: Arc<dyn UnitOfWork>, bus: EventBus) -> Self {
        Self { uow, bus }
    }
}

#[async_trait]
impl Handler for HandleDepositCurrencyConverted {
    async fn handle(&self, ctx: &Context, event: &DomainEvent) -> Result<(), CoreError> {
        let DomainEvent::DepositCurrencyConverted(e) = event else {
            return Err(CoreError::ProgrammerError(
                "HandleDepositCurrencyConverted received a non-Deposit.CurrencyConverted event"
                    .to_string(),
            ));
        };

        let account_id = e.envelope.account_id;
        let user_id = e.envelope.user_id;
        let converted_amount = e.converted.converted_amount;

        let outcome = Arc::new(Mutex::new(None));
        let outcome_inner = outcome.clone();

        let result = self
            .uow
            .do_in_scope(Box::new(move |scope| {
                Box::pin(async move {
                    let account = scope
                        .accounts()
                        .get(account_id)
                        .await?
                        .ok_or_else(|| CoreError::NotFound(format!("account {account_id}")))?;
                    *outcome_inner.lock().unwrap() = Some(account);
                    Ok(())
                })
            }))
            .await;

        if let Err(err) = result {
            return handle_precondition_error(&self.bus, ctx, &e.envelope, err).await;
        }

        let account = outcome.lock().unwrap().take().expect("scope set an outcome on Ok");

        match validation::validate_deposit(user_id, &account, &converted_amount) {
            Ok(()) => {
                let envelope = e.envelope.next();
                self.bus
                    .emit(
                        ctx,
                        DomainEvent::DepositValidated(DepositValidated {
                            envelope: envelope.clone(),
                            amount: converted_amount,
                            via_conversion: true,
                        }),
                    )
                    .await?;
                self.bus
                    .emit(
                        ctx,
                        DomainEvent::PaymentInitiated(PaymentInitiated {
                            envelope: envelope.next(),
                            amount: converted_amount,
                        }),
                    )
                    .await
            }
            Err(err) => handle_precondition_error(&self.bus, ctx, &e.envelope, err).await,
        }
    }
}

/// Emits `Payment.Initiated` for the same-currency fast path only.
/// `via_conversion` events already got their `Payment.Initiated` from
/// `HandleDepositCurrencyConverted`, so this is a no-op for them — see
/// the "double Payment.Initiated" design note.
pub struct HandleDepositValidated {
    bus: EventBus,
}

impl HandleDepositValidated {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Handler for HandleDepositValidated {
    async fn handle(&self, ctx: &Context, event: &DomainEvent) -> Result<(), CoreError> {
        let DomainEvent::DepositValidated(e) = event else {
            return Err(CoreError::ProgrammerError(
                "HandleDepositValidated received a non-Deposit.Validated event".to_string(),
            ));
        };

        if e.via_conversion {
            return Ok(());
        }

        self.bus
            .emit(
                ctx,
                DomainEvent::PaymentInitiated(PaymentInitiated {
                    envelope: e.envelope.next(),
                    amount: e.amount,
                }),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::entities::Account;
    use crate::events::{CurrencyConverted, Envelope, FlowType};
    use crate::uow::in_memory::InMemoryUnitOfWork;
    use common::ids::{AccountId, UserId};
    use common::money::Money;

    fn seeded_account(currency: &str, balance: i64) -> (InMemoryUnitOfWork, Account) {
        let uow = InMemoryUnitOfWork::new();
        let account = Account {
            id: AccountId::new(),
            user_id: UserId::new(),
            balance: Money::from_minor(balance, currency).unwrap(),
            currency: currency.to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            stripe_connect_account_id: None,
        };
        (uow, account)
    }

    fn wire_bus(uow: Arc<dyn UnitOfWork>) -> EventBus {
        let bus = EventBus::new();
        bus.register(
            "Deposit.CurrencyConverted",
            Arc::new(HandleDepositCurrencyConverted::new(uow.clone(), bus.clone())),
        );
        bus.register(
            "Deposit.Validated",
            Arc::new(HandleDepositValidated::new(bus.clone())),
        );
        bus
    }

    #[tokio::test]
    async fn same_currency_deposit_skips_conversion_and_validates_directly() {
        let (uow, account) = seeded_account("USD", 100_000);
        uow.seed_account(account.clone()).await;
        let uow: Arc<dyn UnitOfWork> = Arc::new(uow.clone());
        let bus = wire_bus(uow.clone());
        bus.register(
            "Deposit.Requested",
            Arc::new(HandleDepositRequested::new(uow.clone(), bus.clone())),
        );

        let envelope = Envelope::root(FlowType::Deposit, account.user_id, account.id);
        let event = DomainEvent::DepositRequested(DepositRequested {
            envelope,
            amount: Money::from_minor(10_000, "USD").unwrap(),
        });

        bus.emit(&Context::new(), event).await.unwrap();
    }

    #[tokio::test]
    async fn cross_currency_deposit_emits_conversion_requested() {
        let (uow, account) = seeded_account("USD", 100_000);
        uow.seed_account(account.clone()).await;
        let uow_dyn: Arc<dyn UnitOfWork> = Arc::new(uow.clone());

        let seen = Arc::new(Mutex::new(false));
        let seen_inner = seen.clone();

        struct RecordingHandler(Arc<Mutex<bool>>);
        #[async_trait]
        impl Handler for RecordingHandler {
            async fn handle(&self, _ctx: &Context, event: &DomainEvent) -> Result<(), CoreError> {
                if matches!(event, DomainEvent::CurrencyConversionRequested(_)) {
                    *self.0.lock().unwrap() = true;
                }
                Ok(())
            }
        }

        let bus = EventBus::new();
        bus.register(
            "Deposit.Requested",
            Arc::new(HandleDepositRequested::new(uow_dyn.clone(), bus.clone())),
        );
        bus.register(
            "CurrencyConversion.Requested",
            Arc::new(RecordingHandler(seen_inner)),
        );

        let envelope = Envelope::root(FlowType::Deposit, account.user_id, account.id);
        let event = DomainEvent::DepositRequested(DepositRequested {
            envelope,
            amount: Money::from_minor(10_000, "EUR").unwrap(),
        });

        bus.emit(&Context::new(), event).await.unwrap();
        assert!(*seen.lock().unwrap());
    }

    #[tokio::test]
    async fn deposit_currency_converted_emits_validated_and_initiated_once() {
        let (uow, account) = seeded_account("USD", 0);
        uow.seed_account(account.clone()).await;
        let uow_dyn: Arc<dyn UnitOfWork> = Arc::new(uow);
        let bus = wire_bus(uow_dyn);

        let initiated = Arc::new(Mutex::new(0));
        let initiated_inner = initiated.clone();
        struct CountInitiated(Arc<Mutex<u32>>);
        #[async_trait]
        impl Handler for CountInitiated {
            async fn handle(&self, _ctx: &Context, event: &DomainEvent) -> Result<(), CoreError> {
                if matches!(event, DomainEvent::PaymentInitiated(_)) {
                    *self.0.lock().unwrap() += 1;
                }
                Ok(())
            }
        }
        bus.register("Payment.Initiated", Arc::new(CountInitiated(initiated_inner)));

        let envelope =
            Envelope::root(FlowType::Deposit, account.user_id, account.id).with_transaction_id(
                common::ids::TransactionId::new(),
            );
        let original = DepositRequested {
            envelope: envelope.clone(),
            amount: Money::from_minor(9_000, "EUR").unwrap(),
        };
        let converted = CurrencyConverted {
            envelope: envelope.clone(),
            original_request: OriginalRequest::Deposit(original.clone()),
            original_amount: Money::from_minor(9_000, "EUR").unwrap(),
            converted_amount: Money::from_minor(10_000, "USD").unwrap(),
            rate: rust_decimal::Decimal::new(111, 2),
        };
        let event = DomainEvent::DepositCurrencyConverted(DepositCurrencyConverted {
            envelope,
            original_request: OriginalRequest::Deposit(original),
            converted,
        });

        bus.emit(&Context::new(), event).await.unwrap();
        assert_eq!(*initiated.lock().unwrap(), 1);
    }
}
