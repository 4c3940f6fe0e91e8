use crate::bus::{EventBus, Handler};
use crate::context::Context;
use crate::contracts::payment_provider::{
    BankAccountDestination, InitiatePayoutRequest, PaymentProvider,
};
use crate::contracts::repository::{NewTransaction, TransactionUpdate, UserUpdate};
use crate::entities::{MoneySource, TransactionStatus};
use crate::error::CoreError;
use crate::events::{
    CurrencyConversionRequested, DomainEvent, OriginalRequest, PaymentProcessed, WithdrawRequested,
    WithdrawValidated,
};
use crate::handlers::{handle_precondition_error, validation};
use crate::uow::UnitOfWork;
use async_trait::async_trait;
use common::money::Money;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Entry point of the withdraw flow. Mirrors `HandleDepositRequested`:
/// persists a `created` (immediately advanced to `pending`) transaction,
/// then routes through currency conversion or validates directly.
pub struct HandleWithdrawRequested {
    uow: Arc<dyn UnitOfWork>,
    bus: EventBus,
}

impl HandleWithdrawRequested {
    pub fn new(uow: Arc<dyn UnitOfWork>, bus: EventBus) -> Self {
        Self { uow, bus }
    }
}

#[async_trait]
impl Handler for HandleWithdrawRequested {
    async fn handle(&self, ctx: &Context, event: &DomainEvent) -> Result<(), CoreError> {
        let DomainEvent::WithdrawRequested(req) = event else {
            return Err(CoreError::ProgrammerError(
                "HandleWithdrawRequested received a non-Withdraw.Requested event".to_string(),
            ));
        };

        if req.amount.is_zero() || req.amount.is_negative() {
            return handle_precondition_error(
                &self.bus,
                ctx,
                &req.envelope,
                CoreError::InvalidRequest(format!(
                    "withdraw amount {} must be strictly positive",
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
                            money_source: MoneySource::BankTransfer,
                        })
                        .await?;
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
                DomainEvent::WithdrawPersisted(crate::events::WithdrawPersisted {
                    envelope: envelope.clone(),
                    amount,
                }),
            )
            .await?;

        if amount.currency() == account.currency {
            return match validation::validate_withdraw(user_id, &account, &amount) {
                Ok(()) => {
                    self.bus
                        .emit(
                            ctx,
                            DomainEvent::WithdrawValidated(WithdrawValidated {
                                envelope,
                                amount,
                                bank_account_number: req.bank_account_number.clone(),
                                routing_number: req.routing_number.clone(),
                                description: req.description.clone(),
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
                    original_request: OriginalRequest::Withdraw(req.clone()),
                    target_currency: account.currency,
                    to_transaction_id: None,
                }),
            )
            .await
    }
}

/// Runs after an external FX quote comes back for a cross-currency
/// withdrawal. Revalidates the converted amount (including sufficient
/// funds) and, on success, emits `Withdraw.Validated` itself — the payout
/// call lives entirely in `HandleWithdrawValidated`.
pub struct HandleWithdrawCurrencyConverted {
    uow: Arc<dyn UnitOfWork>,
    bus: EventBus,
}

impl HandleWithdrawCurrencyConverted {
    pub fn new(uow: Arc<dyn UnitOfWork>, bus: EventBus) -> Self {
        Self { uow, bus }
    }
}

#[async_trait]
impl Handler for HandleWithdrawCurrencyConverted {
    async fn handle(&self, ctx: &Context, event: &DomainEvent) -> Result<(), CoreError> {
        let DomainEvent::WithdrawCurrencyConverted(e) = event else {
            return Err(CoreError::ProgrammerError(
                "HandleWithdrawCurrencyConverted received a non-Withdraw.CurrencyConverted event"
                    .to_string(),
            ));
        };

        let OriginalRequest::Withdraw(original) = &e.original_request else {
            return Err(CoreError::ProgrammerError(
                "Withdraw.CurrencyConverted carried a non-withdraw original request".to_string(),
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

        match validation::validate_withdraw(user_id, &account, &converted_amount) {
            Ok(()) => {
                self.bus
                    .emit(
                        ctx,
                        DomainEvent::WithdrawValidated(WithdrawValidated {
                            envelope: e.envelope.next(),
                            amount: converted_amount,
                            bank_account_number: original.bank_account_number.clone(),
                            routing_number: original.routing_number.clone(),
                            description: original.description.clone(),
                            via_conversion: true,
                        }),
                    )
                    .await
            }
            Err(err) => handle_precondition_error(&self.bus, ctx, &e.envelope, err).await,
        }
    }
}

fn last4(value: &str) -> String {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    let start = digits.len().saturating_sub(4);
    digits[start..].to_string()
}

fn mask_last4(value: &str) -> String {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= 4 {
        return "*".repeat(digits.len());
    }
    format!("{}{}", "*".repeat(digits.len() - 4), last4(value))
}

fn payout_metadata(
    correlation_id: impl std::fmt::Display,
    account_id: impl std::fmt::Display,
    user_id: impl std::fmt::Display,
    stripe_account_id: &str,
    bank_account_number: &str,
    routing_number: &str,
    first_name: &str,
    last_name: &str,
    email: &str,
    amount: &Money,
) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    metadata.insert("correlation_id".to_string(), correlation_id.to_string());
    metadata.insert("flow_type".to_string(), "withdraw".to_string());
    metadata.insert("stripe_account_id".to_string(), stripe_account_id.to_string());
    metadata.insert("bank_account_last4".to_string(), last4(bank_account_number));
    metadata.insert("bank_routing".to_string(), mask_last4(routing_number));
    metadata.insert("user_id".to_string(), user_id.to_string());
    metadata.insert("account_id".to_string(), account_id.to_string());
    metadata.insert("user_email".to_string(), email.to_string());
    metadata.insert("user_first_name".to_string(), first_name.to_string());
    metadata.insert("user_last_name".to_string(), last_name.to_string());
    metadata.insert(
        "amount".to_string(),
        format!("{:.2}", amount.amount_float(2)),
    );
    metadata.insert("currency".to_string(), amount.currency().to_lowercase());
    metadata
}

/// Invokes the payout side of the provider directly, bypassing the
/// generic `Payment.Initiated`/`HandlePaymentInitiated` stage entirely:
/// a payout is a single request/response call, not a fire-and-forget
/// charge the provider confirms later over a webhook. Persists the
/// returned connect account id onto the user, then emits
/// `Payment.Processed` with the payout id as `paymentId`.
pub struct HandleWithdrawValidated {
    uow: Arc<dyn UnitOfWork>,
    provider: Arc<dyn PaymentProvider>,
    bus: EventBus,
}

impl HandleWithdrawValidated {
    pub fn new(
        uow: Arc<dyn UnitOfWork>,
        provider: Arc<dyn PaymentProvider>,
        bus: EventBus,
    ) -> Self {
        Self { uow, provider, bus }
    }
}

#[async_trait]
impl Handler for HandleWithdrawValidated {
    async fn handle(&self, ctx: &Context, event: &DomainEvent) -> Result<(), CoreError> {
        let DomainEvent::WithdrawValidated(e) = event else {
            return Err(CoreError::ProgrammerError(
                "HandleWithdrawValidated received a non-Withdraw.Validated event".to_string(),
            ));
        };

        let transaction_id = e.envelope.transaction_id;
        let account_id = e.envelope.account_id;
        let user_id = e.envelope.user_id;
        let amount = e.amount;
        let description = e.description.clone();
        let bank_account_number = e.bank_account_number.clone();
        let routing_number = e.routing_number.clone();
        let correlation_id = e.envelope.correlation_id;
        let provider = self.provider.clone();
        let provider_ctx = ctx.clone();

        let outcome = Arc::new(Mutex::new(None));
        let outcome_inner = outcome.clone();

        let result = self
            .uow
            .do_in_scope(Box::new(move |scope| {
                Box::pin(async move {
                    let user = scope
                        .users()
                        .get(user_id)
                        .await?
                        .ok_or_else(|| CoreError::NotFound(format!("user {user_id}")))?;
                    let (first_name, last_name) = user.first_and_last_name();
                    let stripe_account_id = user.stripe_connect_account_id.clone().unwrap_or_default();

                    let metadata = payout_metadata(
                        correlation_id,
                        account_id,
                        user_id,
                        &stripe_account_id,
                        &bank_account_number,
                        &routing_number,
                        &first_name,
                        &last_name,
                        &user.email,
                        &amount,
                    );

                    let transaction_id = transaction_id.ok_or_else(|| {
                        CoreError::ProgrammerError(
                            "Withdraw.Validated missing transaction id".to_string(),
                        )
                    })?;

                    let payout = provider
                        .initiate_payout(
                            &provider_ctx,
                            InitiatePayoutRequest {
                                user_id,
                                account_id,
                                provider_connect_account_id: stripe_account_id,
                                transaction_id,
                                amount,
                                description: description.clone(),
                                metadata,
                                destination: BankAccountDestination {
                                    account_number: bank_account_number.clone(),
                                    routing_number: routing_number.clone(),
                                },
                            },
                        )
                        .await?;

                    scope
                        .users()
                        .update(
                            user_id,
                            UserUpdate {
                                stripe_connect_account_id: Some(Some(
                                    payout.payment_provider_id.clone(),
                                )),
                            },
                        )
                        .await?;

                    *outcome_inner.lock().unwrap() = Some(payout);
                    Ok(())
                })
            }))
            .await;

        if let Err(err) = result {
            self.bus
                .emit(
                    ctx,
                    crate::handlers::failed_event_for(&e.envelope, err.to_string()),
                )
                .await?;
            return Err(err);
        }

        let payout = outcome.lock().unwrap().take().expect("scope set an outcome on Ok");

        self.bus
            .emit(
                ctx,
                DomainEvent::PaymentProcessed(PaymentProcessed {
                    envelope: e.envelope.next(),
                    payment_id: Some(payout.payout_id),
                    amount: Some(amount),
                }),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::contracts::payment_provider::{InitiatePayoutResult, MockPaymentProvider, PaymentStatus};
    use crate::entities::{Account, User};
    use crate::events::Envelope;
    use crate::events::FlowType;
    use crate::uow::in_memory::InMemoryUnitOfWork;
    use common::ids::{AccountId, PaymentId, UserId};

    fn seeded(currency: &str, balance: i64) -> (InMemoryUnitOfWork, Account, User) {
        let uow = InMemoryUnitOfWork::new();
        let user_id = UserId::new();
        let account = Account {
            id: AccountId::new(),
            user_id,
            balance: Money::from_minor(balance, currency).unwrap(),
            currency: currency.to_string(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            stripe_connect_account_id: None,
        };
        let user = User {
            id: user_id,
            username: "jdoe".to_string(),
            email: "jdoe@example.com".to_string(),
            names: "Jane Doe".to_string(),
            stripe_connect_account_id: None,
        };
        (uow, account, user)
    }

    #[test]
    fn masks_bank_details_to_last_four() {
        assert_eq!(mask_last4("021000021"), "*****0021");
        assert_eq!(mask_last4("12"), "**");
    }

    #[tokio::test]
    async fn same_currency_withdraw_invokes_payout_and_emits_processed() {
        let (uow, account, user) = seeded("USD", 50_000);
        uow.seed_account(account.clone()).await;
        uow.seed_user(user.clone()).await;
        let uow_dyn: Arc<dyn UnitOfWork> = Arc::new(uow);

        let mut provider = MockPaymentProvider::new();
        provider.expect_initiate_payout().returning(|_, _| {
            Ok(InitiatePayoutResult {
                payout_id: PaymentId::new(),
                payment_provider_id: "acct_123".to_string(),
                status: PaymentStatus::Pending,
                fee_amount: None,
                estimated_arrival_date: None,
            })
        });
        let provider: Arc<dyn PaymentProvider> = Arc::new(provider);

        let processed = Arc::new(Mutex::new(0));
        let processed_inner = processed.clone();
        struct CountProcessed(Arc<Mutex<u32>>);
        #[async_trait]
        impl Handler for CountProcessed {
            async fn handle(&self, _ctx: &Context, event: &DomainEvent) -> Result<(), CoreError> {
                if matches!(event, DomainEvent::PaymentProcessed(_)) {
                    *self.0.lock().unwrap() += 1;
                }
                Ok(())
            }
        }

        let bus = EventBus::new();
        bus.register(
            "Withdraw.Requested",
            Arc::new(HandleWithdrawRequested::new(uow_dyn.clone(), bus.clone())),
        );
        bus.register(
            "Withdraw.Validated",
            Arc::new(HandleWithdrawValidated::new(
                uow_dyn.clone(),
                provider.clone(),
                bus.clone(),
            )),
        );
        bus.register("Payment.Processed", Arc::new(CountProcessed(processed_inner)));

        let envelope = Envelope::root(FlowType::Withdraw, account.user_id, account.id);
        let event = DomainEvent::WithdrawRequested(WithdrawRequested {
            envelope,
            amount: Money::from_minor(10_000, "USD").unwrap(),
            bank_account_number: "000123456789".to_string(),
            routing_number: "021000021".to_string(),
            description: "payout".to_string(),
        });

        bus.emit(&Context::new(), event).await.unwrap();
        assert_eq!(*processed.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn withdraw_rejects_insufficient_funds_with_failed_event() {
        let (uow, account, user) = seeded("USD", 100);
        uow.seed_account(account.clone()).await;
        uow.seed_user(user).await;
        let uow_dyn: Arc<dyn UnitOfWork> = Arc::new(uow);

        let failed = Arc::new(Mutex::new(false));
        let failed_inner = failed.clone();
        struct RecordFailed(Arc<Mutex<bool>>);
        #[async_trait]
        impl Handler for RecordFailed {
            async fn handle(&self, _ctx: &Context, event: &DomainEvent) -> Result<(), CoreError> {
                if matches!(event, DomainEvent::WithdrawFailed(_)) {
                    *self.0.lock().unwrap() = true;
                }
                Ok(())
            }
        }

        let bus = EventBus::new();
        bus.register(
            "Withdraw.Requested",
            Arc::new(HandleWithdrawRequested::new(uow_dyn.clone(), bus.clone())),
        );
        bus.register("Withdraw.Failed", Arc::new(RecordFailed(failed_inner)));

        let envelope = Envelope::root(FlowType::Withdraw, account.user_id, account.id);
        let event = DomainEvent::WithdrawRequested(WithdrawRequested {
            envelope,
            amount: Money::from_minor(10_000, "USD").unwrap(),
            bank_account_number: "000123456789".to_string(),
            routing_number: "021000021".to_string(),
            description: "payout".to_string(),
        });

        let result = bus.emit(&Context::new(), event).await;
        assert!(result.is_err());
        assert!(*failed.lock().unwrap());
    }
}
