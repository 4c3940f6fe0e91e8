use async_trait::async_trait;
use std::sync::Arc;
use txn_core::bus::{EventBus, Handler};
use txn_core::context::Context;
use txn_core::contracts::fx_converter::FxConverter;
use txn_core::error::CoreError;
use txn_core::events::{
    CurrencyConverted, DepositCurrencyConverted, DomainEvent, OriginalRequest,
    TransferCurrencyConverted, WithdrawCurrencyConverted,
};

/// The external conversion service that sits outside core: it subscribes
/// to `CurrencyConversion.Requested`, calls the FX converter, and emits
/// the flow-wrapped `*.CurrencyConverted` event the matching flow handler
/// resumes on.
pub struct CurrencyConversionGateway {
    converter: Arc<dyn FxConverter>,
    bus: EventBus,
}

impl CurrencyConversionGateway {
    pub fn new(converter: Arc<dyn FxConverter>, bus: EventBus) -> Self {
        Self { converter, bus }
    }
}

#[async_trait]
impl Handler for CurrencyConversionGateway {
    async fn handle(&self, ctx: &Context, event: &DomainEvent) -> Result<(), CoreError> {
        let DomainEvent::CurrencyConversionRequested(e) = event else {
            return Err(CoreError::ProgrammerError(
                "CurrencyConversionGateway received a non-CurrencyConversion.Requested event"
                    .to_string(),
            ));
        };

        let original_amount = match &e.original_request {
            OriginalRequest::Deposit(r) => r.amount,
            OriginalRequest::Withdraw(r) => r.amount,
            OriginalRequest::Transfer(r) => r.amount,
        };

        let result = self
            .converter
            .convert(ctx, original_amount, &e.target_currency)
            .await?;

        let converted = CurrencyConverted {
            envelope: e.envelope.next(),
            original_request: e.original_request.clone(),
            original_amount: result.original_amount,
            converted_amount: result.converted_amount,
            rate: result.rate,
        };

        let wrapped = match &e.original_request {
            OriginalRequest::Deposit(_) => DomainEvent::DepositCurrencyConverted(DepositCurrencyConverted {
                envelope: converted.envelope.clone(),
                original_request: converted.original_request.clone(),
                converted,
            }),
            OriginalRequest::Withdraw(_) => {
                DomainEvent::WithdrawCurrencyConverted(WithdrawCurrencyConverted {
                    envelope: converted.envelope.clone(),
                    original_request: converted.original_request.clone(),
                    converted,
                })
            }
            OriginalRequest::Transfer(_) => {
                let from_transaction_id = e.envelope.transaction_id.ok_or_else(|| {
                    CoreError::ProgrammerError(
                        "Transfer CurrencyConversion.Requested missing from-leg transaction id"
                            .to_string(),
                    )
                })?;
                let to_transaction_id = e.to_transaction_id.ok_or_else(|| {
                    CoreError::ProgrammerError(
                        "Transfer CurrencyConversion.Requested missing to-leg transaction id"
                            .to_string(),
                    )
                })?;
                DomainEvent::TransferCurrencyConverted(TransferCurrencyConverted {
                    envelope: converted.envelope.clone(),
                    original_request: converted.original_request.clone(),
                    converted,
                    from_transaction_id,
                    to_transaction_id,
                })
            }
        };

        self.bus.emit(ctx, wrapped).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::gateways::fake_fx_converter::FakeFxConverter;
    use common::ids::{AccountId, TransactionId, UserId};
    use common::money::Money;
    use std::sync::Mutex;
    use txn_core::events::{DepositRequested, Envelope, FlowType, TransferRequested, WithdrawRequested};

    struct CapturingHandler(Arc<Mutex<Option<DomainEvent>>>);

    #[async_trait]
    impl Handler for CapturingHandler {
        async fn handle(&self, _ctx: &Context, event: &DomainEvent) -> Result<(), CoreError> {
            *self.0.lock().unwrap() = Some(event.clone());
            Ok(())
        }
    }

    fn wire(event_type: &'static str) -> (EventBus, Arc<Mutex<Option<DomainEvent>>>) {
        let bus = EventBus::new();
        let captured = Arc::new(Mutex::new(None));
        bus.register(event_type, Arc::new(CapturingHandler(captured.clone())));
        let converter: Arc<dyn FxConverter> = Arc::new(FakeFxConverter::new());
        bus.register(
            "CurrencyConversion.Requested",
            Arc::new(CurrencyConversionGateway::new(converter, bus.clone())),
        );
        (bus, captured)
    }

    #[tokio::test]
    async fn deposit_conversion_emits_deposit_currency_converted() {
        let (bus, captured) = wire("Deposit.CurrencyConverted");
        let envelope = Envelope::root(FlowType::Deposit, UserId::new(), AccountId::new())
            .with_transaction_id(TransactionId::new());
        let original_request = OriginalRequest::Deposit(DepositRequested {
            envelope: envelope.clone(),
            amount: Money::from_minor(10_000, "EUR").unwrap(),
        });

        bus.emit(
            &Context::new(),
            DomainEvent::CurrencyConversionRequested(txn_core::events::CurrencyConversionRequested {
                envelope,
                original_request,
                target_currency: "USD".to_string(),
                to_transaction_id: None,
            }),
        )
        .await
        .unwrap();

        let event = captured.lock().unwrap().take().expect("handler should have run");
        assert!(matches!(event, DomainEvent::DepositCurrencyConverted(_)));
    }

    #[tokio::test]
    async fn withdraw_conversion_emits_withdraw_currency_converted() {
        let (bus, captured) = wire("Withdraw.CurrencyConverted");
        let envelope = Envelope::root(FlowType::Withdraw, UserId::new(), AccountId::new())
            .with_transaction_id(TransactionId::new());
        let original_request = OriginalRequest::Withdraw(WithdrawRequested {
            envelope: envelope.clone(),
            amount: Money::from_minor(5_000, "GBP").unwrap(),
            bank_account_number: "0001".to_string(),
            routing_number: "110000000".to_string(),
            description: "payout".to_string(),
        });

        bus.emit(
            &Context::new(),
            DomainEvent::CurrencyConversionRequested(txn_core::events::CurrencyConversionRequested {
                envelope,
                original_request,
                target_currency: "USD".to_string(),
                to_transaction_id: None,
            }),
        )
        .await
        .unwrap();

        let event = captured.lock().unwrap().take().expect("handler should have run");
        assert!(matches!(event, DomainEvent::WithdrawCurrencyConverted(_)));
    }

    #[tokio::test]
    async fn transfer_conversion_carries_both_leg_ids() {
        let (bus, captured) = wire("Transfer.CurrencyConverted");
        let from_account = AccountId::new();
        let to_account = AccountId::new();
        let from_tx = TransactionId::new();
        let to_tx = TransactionId::new();
        let envelope = Envelope::root(FlowType::Transfer, UserId::new(), from_account)
            .with_transaction_id(from_tx);
        let original_request = OriginalRequest::Transfer(TransferRequested {
            envelope: envelope.clone(),
            from_account_id: from_account,
            to_account_id: to_account,
            amount: Money::from_minor(2_000, "EUR").unwrap(),
        });

        bus.emit(
            &Context::new(),
            DomainEvent::CurrencyConversionRequested(txn_core::events::CurrencyConversionRequested {
                envelope,
                original_request,
                target_currency: "USD".to_string(),
                to_transaction_id: Some(to_tx),
            }),
        )
        .await
        .unwrap();

        let event = captured.lock().unwrap().take().expect("handler should have run");
        match event {
            DomainEvent::TransferCurrencyConverted(e) => {
                assert_eq!(e.from_transaction_id, from_tx);
                assert_eq!(e.to_transaction_id, to_tx);
            }
            other => panic!("expected TransferCurrencyConverted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transfer_conversion_without_to_transaction_id_is_a_programmer_error() {
        let (bus, _captured) = wire("Transfer.CurrencyConverted");
        let envelope = Envelope::root(FlowType::Transfer, UserId::new(), AccountId::new())
            .with_transaction_id(TransactionId::new());
        let original_request = OriginalRequest::Transfer(TransferRequested {
            envelope: envelope.clone(),
            from_account_id: AccountId::new(),
            to_account_id: AccountId::new(),
            amount: Money::from_minor(2_000, "EUR").unwrap(),
        });

        let result = bus
            .emit(
                &Context::new(),
                DomainEvent::CurrencyConversionRequested(txn_core::events::CurrencyConversionRequested {
                    envelope,
                    original_request,
                    target_currency: "USD".to_string(),
                    to_transaction_id: None,
                }),
            )
            .await;

        assert!(matches!(result, Err(CoreError::ProgrammerError(_))));
    }
}
