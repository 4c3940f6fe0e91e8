use crate::context::Context;
use crate::error::CoreError;
use crate::events::DomainEvent;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, instrument};

/// A single stage of a flow's state machine. Handlers are pure with
/// respect to the bus: given a context and an event they read/write
/// through a unit of work and return an error; they never retain state
/// across invocations except via the idempotency tracker and the
/// injected repositories.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &Context, event: &DomainEvent) -> Result<(), CoreError>;
}

/// Registers handlers by event type and delivers emitted events to all of
/// them, serially, in registration order. `register` is called only
/// during wiring, before any `emit`; `EventBus` is `Clone` (an `Arc`
/// underneath) so a handler that itself needs to emit follow-on events
/// can hold a clone of the very bus it is registered on.
#[derive(Default, Clone)]
pub struct EventBus {
    handlers: Arc<RwLock<HashMap<&'static str, Vec<Arc<dyn Handler>>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, event_type: &'static str, handler: Arc<dyn Handler>) {
        self.handlers
            .write()
            .expect("event bus registration lock poisoned")
            .entry(event_type)
            .or_default()
            .push(handler);
    }

    /// Delivers `event` to every handler registered for `event.event_type()`,
    /// serially, in registration order, returning the first error raised.
    /// An event with no subscribers is a no-op success.
    #[instrument(name = "EventBus::emit", skip(self, ctx, event), fields(event_type = event.event_type()))]
    pub async fn emit(&self, ctx: &Context, event: DomainEvent) -> Result<(), CoreError> {
        let event_type = event.event_type();
        let handlers = {
            let guard = self
                .handlers
                .read()
                .expect("event bus registration lock poisoned");
            match guard.get(event_type) {
                Some(handlers) => handlers.clone(),
                None => {
                    debug!("no handlers registered for {event_type}, treating as no-op");
                    return Ok(());
                }
            }
        };

        for handler in &handlers {
            handler.handle(ctx, &event).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DepositFailed, Envelope, FlowType};
    use common::ids::{AccountId, UserId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl Handler for CountingHandler {
        async fn handle(&self, _ctx: &Context, _event: &DomainEvent) -> Result<(), CoreError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn sample_event() -> DomainEvent {
        let envelope = Envelope::root(FlowType::Deposit, UserId::new(), AccountId::new());
        DomainEvent::DepositFailed(DepositFailed {
            envelope,
            reason: "test".to_string(),
        })
    }

    #[tokio::test]
    async fn emit_invokes_each_registered_handler_exactly_once() {
        let counter_a = Arc::new(AtomicUsize::new(0));
        let counter_b = Arc::new(AtomicUsize::new(0));

        let bus = EventBus::new();
        bus.register("Deposit.Failed", Arc::new(CountingHandler(counter_a.clone())));
        bus.register("Deposit.Failed", Arc::new(CountingHandler(counter_b.clone())));

        bus.emit(&Context::new(), sample_event()).await.unwrap();

        assert_eq!(counter_a.load(Ordering::SeqCst), 1);
        assert_eq!(counter_b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn emit_with_no_subscribers_is_a_no_op() {
        let bus = EventBus::new();
        assert!(bus.emit(&Context::new(), sample_event()).await.is_ok());
    }

    struct FailingHandler;

    #[async_trait]
    impl Handler for FailingHandler {
        async fn handle(&self, _ctx: &Context, _event: &DomainEvent) -> Result<(), CoreError> {
            Err(CoreError::Transient("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn emit_returns_first_handler_error() {
        let bus = EventBus::new();
        bus.register("Deposit.Failed", Arc::new(FailingHandler));

        let result = bus.emit(&Context::new(), sample_event()).await;
        assert_eq!(result, Err(CoreError::Transient("boom".to_string())));
    }
}
