pub mod conversion;
pub mod gateways;
pub mod persistence;
pub mod uow;

use std::sync::Arc;
use txn_core::bus::EventBus;
use txn_core::contracts::fx_converter::FxConverter;
use txn_core::idempotency::IdempotencyTracker;
use txn_core::wiring::{self, Dependencies};

use conversion::CurrencyConversionGateway;

/// Registers the core state machine's handlers plus the one collaborator
/// the core intentionally doesn't own: the currency conversion gateway.
pub fn register_all(
    bus: &EventBus,
    deps: &Dependencies,
    tracker: Arc<IdempotencyTracker>,
    fx_converter: Arc<dyn FxConverter>,
) {
    wiring::register_all(bus, deps, tracker);
    bus.register(
        "CurrencyConversion.Requested",
        Arc::new(CurrencyConversionGateway::new(fx_converter, bus.clone())),
    );
}
