//! One handler type per state-machine stage, grouped by flow. Each
//! handler is registered on the bus for exactly one event type in
//! `wiring::register_all`, which also applies idempotency wrapping.

pub mod deposit;
pub mod fees;
pub mod payment;
pub mod transfer;
pub mod validation;
pub mod withdraw;

use crate::bus::EventBus;
use crate::context::Context;
use crate::error::CoreError;
use crate::events::{DomainEvent, Envelope, FlowType};

/// Builds the flow-appropriate `*.Failed` event for a stage that doesn't
/// know which flow it's serving except through the envelope it was handed.
pub(crate) fn failed_event_for(envelope: &Envelope, reason: String) -> DomainEvent {
    let envelope = envelope.next();
    match envelope.flow_type {
        FlowType::Deposit => DomainEvent::DepositFailed(crate::events::DepositFailed {
            envelope,
            reason,
        }),
        FlowType::Withdraw => DomainEvent::WithdrawFailed(crate::events::WithdrawFailed {
            envelope,
            reason,
        }),
        FlowType::Transfer => DomainEvent::TransferFailed(crate::events::TransferFailed {
            envelope,
            reason,
        }),
        FlowType::Payment => DomainEvent::PaymentFailed(crate::events::PaymentFailed {
            envelope,
            payment_id: None,
            reason,
        }),
    }
}

/// Applies the standard error-handling policy to a precondition failure
/// (a validation or domain-rule check that ran before any state change):
/// `InvalidRequest` emits the flow's Failed event and is swallowed,
/// `InvariantViolation` emits the Failed event but still propagates,
/// everything else (NotFound, Transient, Conflict, ProgrammerError)
/// propagates without emitting anything.
pub(crate) async fn handle_precondition_error(
    bus: &EventBus,
    ctx: &Context,
    envelope: &Envelope,
    err: CoreError,
) -> Result<(), CoreError> {
    match &err {
        CoreError::InvalidRequest(msg) => {
            bus.emit(ctx, failed_event_for(envelope, msg.clone())).await?;
            Ok(())
        }
        CoreError::InvariantViolation(msg) => {
            bus.emit(ctx, failed_event_for(envelope, msg.clone())).await?;
            Err(err)
        }
        _ => Err(err),
    }
}
