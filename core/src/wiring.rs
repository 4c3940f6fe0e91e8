//! Builds the bus: one handler per state-machine stage, registered under
//! the event type it subscribes to, with idempotency wrapping applied at
//! the stages that trigger an at-most-once side effect (validated,
//! initiated, processed, completed). Everything else (requested,
//! persisted, failed, currency conversion requests) runs unwrapped —
//! those stages are naturally idempotent or have no effect to protect.

use crate::bus::EventBus;
use crate::contracts::payment_provider::PaymentProvider;
use crate::events::DomainEvent;
use crate::handlers::deposit::{HandleDepositCurrencyConverted, HandleDepositRequested, HandleDepositValidated};
use crate::handlers::fees::HandleFeesCalculated;
use crate::handlers::payment::{
    HandlePaymentCompleted, HandlePaymentFailed, HandlePaymentInitiated, HandlePaymentProcessed,
};
use crate::handlers::transfer::{
    HandleTransferCurrencyConverted, HandleTransferRequested, HandleTransferValidated,
};
use crate::handlers::withdraw::{
    HandleWithdrawCurrencyConverted, HandleWithdrawRequested, HandleWithdrawValidated,
};
use crate::idempotency::{with_idempotency, IdempotencyTracker};
use crate::uow::UnitOfWork;
use std::sync::Arc;

/// Everything the handlers need, assembled once at process startup and
/// handed to `register_all`.
pub struct Dependencies {
    pub uow: Arc<dyn UnitOfWork>,
    pub payment_provider: Arc<dyn PaymentProvider>,
}

fn transaction_id_key(event: &DomainEvent) -> String {
    event
        .envelope()
        .transaction_id
        .map(|id| id.to_string())
        .unwrap_or_default()
}

fn transfer_legs_key(event: &DomainEvent) -> String {
    match event {
        DomainEvent::TransferValidated(e) => {
            format!("{}:{}", e.from_transaction_id, e.to_transaction_id)
        }
        _ => transaction_id_key(event),
    }
}

fn payment_id_else_transaction_id_key(event: &DomainEvent) -> String {
    let payment_id = match event {
        DomainEvent::PaymentProcessed(e) => e.payment_id,
        DomainEvent::PaymentCompleted(e) => e.payment_id,
        DomainEvent::PaymentFailed(e) => e.payment_id,
        _ => None,
    };
    match payment_id {
        Some(id) => id.to_string(),
        None => transaction_id_key(event),
    }
}

/// Constructs every handler, wraps the at-most-once stages with
/// idempotency, and registers each on `bus`. Call once at startup; the
/// bus is read-only for registration purposes afterwards.
pub fn register_all(bus: &EventBus, deps: &Dependencies, tracker: Arc<IdempotencyTracker>) {
    let uow = deps.uow.clone();
    let provider = deps.payment_provider.clone();

    bus.register(
        "Deposit.Requested",
        Arc::new(HandleDepositRequested::new(uow.clone(), bus.clone())),
    );
    bus.register(
        "Deposit.CurrencyConverted",
        Arc::new(HandleDepositCurrencyConverted::new(uow.clone(), bus.clone())),
    );
    bus.register(
        "Deposit.Validated",
        with_idempotency(
            "HandleDepositValidated",
            tracker.clone(),
            Arc::new(HandleDepositValidated::new(bus.clone())),
            transaction_id_key,
        ),
    );

    bus.register(
        "Withdraw.Requested",
        Arc::new(HandleWithdrawRequested::new(uow.clone(), bus.clone())),
    );
    bus.register(
        "Withdraw.CurrencyConverted",
        Arc::new(HandleWithdrawCurrencyConverted::new(uow.clone(), bus.clone())),
    );
    bus.register(
        "Withdraw.Validated",
        with_idempotency(
            "HandleWithdrawValidated",
            tracker.clone(),
            Arc::new(HandleWithdrawValidated::new(
                uow.clone(),
                provider.clone(),
                bus.clone(),
            )),
            transaction_id_key,
        ),
    );

    bus.register(
        "Transfer.Requested",
        Arc::new(HandleTransferRequested::new(uow.clone(), bus.clone())),
    );
    bus.register(
        "Transfer.CurrencyConverted",
        Arc::new(HandleTransferCurrencyConverted::new(uow.clone(), bus.clone())),
    );
    bus.register(
        "Transfer.Validated",
        with_idempotency(
            "HandleTransferValidated",
            tracker.clone(),
            Arc::new(HandleTransferValidated::new(uow.clone())),
            transfer_legs_key,
        ),
    );

    bus.register(
        "Payment.Initiated",
        with_idempotency(
            "HandlePaymentInitiated",
            tracker.clone(),
            Arc::new(HandlePaymentInitiated::new(provider.clone(), bus.clone())),
            transaction_id_key,
        ),
    );
    bus.register(
        "Payment.Processed",
        with_idempotency(
            "HandlePaymentProcessed",
            tracker.clone(),
            Arc::new(HandlePaymentProcessed::new(uow.clone())),
            payment_id_else_transaction_id_key,
        ),
    );
    bus.register(
        "Payment.Completed",
        with_idempotency(
            "HandlePaymentCompleted",
            tracker.clone(),
            Arc::new(HandlePaymentCompleted::new(uow.clone(), bus.clone())),
            payment_id_else_transaction_id_key,
        ),
    );
    bus.register(
        "Payment.Failed",
        Arc::new(HandlePaymentFailed::new(uow.clone())),
    );

    bus.register("Fees.Calculated", Arc::new(HandleFeesCalculated::new(uow)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::payment_provider::MockPaymentProvider;
    use crate::uow::in_memory::InMemoryUnitOfWork;

    #[test]
    fn register_all_wires_every_stage_without_panicking() {
        let bus = EventBus::new();
        let uow: Arc<dyn UnitOfWork> = Arc::new(InMemoryUnitOfWork::new());
        let provider: Arc<dyn PaymentProvider> = Arc::new(MockPaymentProvider::new());
        let tracker = Arc::new(IdempotencyTracker::new());

        register_all(
            &bus,
            &Dependencies {
                uow,
                payment_provider: provider,
            },
            tracker,
        );
    }
}
