use chrono::{DateTime, Utc};
use common::ids::{AccountId, CorrelationId, EventId, PaymentId, TransactionId, UserId};
use common::money::Money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The flow a root event (and everything it spawns) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowType {
    Deposit,
    Withdraw,
    Transfer,
    Payment,
}

/// The envelope embedded in every domain event: flow type, user, account,
/// correlation id, timestamp. `transaction_id` is assigned no later than
/// the persistence stage and copied forward from there on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: EventId,
    pub flow_type: FlowType,
    pub user_id: UserId,
    pub account_id: AccountId,
    pub correlation_id: CorrelationId,
    pub timestamp: DateTime<Utc>,
    pub transaction_id: Option<TransactionId>,
}

impl Envelope {
    pub fn root(flow_type: FlowType, user_id: UserId, account_id: AccountId) -> Self {
        Self {
            id: EventId::new(),
            flow_type,
            user_id,
            account_id,
            correlation_id: CorrelationId::new(),
            timestamp: Utc::now(),
            transaction_id: None,
        }
    }

    /// Derives a fresh envelope for a follow-on event, preserving the
    /// correlation id and transaction id of the flow.
    pub fn next(&self) -> Self {
        Self {
            id: EventId::new(),
            flow_type: self.flow_type,
            user_id: self.user_id,
            account_id: self.account_id,
            correlation_id: self.correlation_id,
            timestamp: Utc::now(),
            transaction_id: self.transaction_id,
        }
    }

    pub fn with_transaction_id(mut self, transaction_id: TransactionId) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }
}

macro_rules! event_struct {
    ($name:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub struct $name {
            pub envelope: Envelope,
            $(pub $field: $ty,)*
        }

        impl $name {
            pub fn correlation_id(&self) -> CorrelationId {
                self.envelope.correlation_id
            }
        }
    };
}

event_struct!(DepositRequested { amount: Money });
event_struct!(DepositValidated {
    amount: Money,
    // Marks whether this event followed a currency conversion hop.
    // HandleDepositValidated only emits Payment.Initiated when this is
    // false; when true, HandleDepositCurrencyConverted already emitted it.
    via_conversion: bool,
});
event_struct!(DepositPersisted { amount: Money });
event_struct!(DepositFailed { reason: String });

event_struct!(WithdrawRequested {
    amount: Money,
    bank_account_number: String,
    routing_number: String,
    description: String,
});
event_struct!(WithdrawValidated {
    amount: Money,
    bank_account_number: String,
    routing_number: String,
    description: String,
    via_conversion: bool,
});
event_struct!(WithdrawPersisted { amount: Money });
event_struct!(WithdrawFailed { reason: String });

event_struct!(TransferRequested {
    from_account_id: AccountId,
    to_account_id: AccountId,
    amount: Money,
});
event_struct!(TransferValidated {
    from_account_id: AccountId,
    to_account_id: AccountId,
    from_transaction_id: TransactionId,
    to_transaction_id: TransactionId,
    // Debited from `from_account_id`, in its currency. Equal to `amount`
    // unless `via_conversion` is true, in which case `amount` is the
    // post-conversion figure credited to `to_account_id` instead.
    from_amount: Money,
    amount: Money,
    via_conversion: bool,
});
event_struct!(TransferPersisted {
    from_account_id: AccountId,
    to_account_id: AccountId,
    from_transaction_id: TransactionId,
    to_transaction_id: TransactionId,
    amount: Money,
});
event_struct!(TransferFailed { reason: String });

/// Polymorphic reference to the event that started a flow, carried by the
/// currency-conversion events so a handler can resume the right state
/// machine once a quote comes back. Modeled as a sum type rather than the
/// source's embedded-struct inheritance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OriginalRequest {
    Deposit(DepositRequested),
    Withdraw(WithdrawRequested),
    Transfer(TransferRequested),
}

impl OriginalRequest {
    pub fn envelope(&self) -> &Envelope {
        match self {
            OriginalRequest::Deposit(e) => &e.envelope,
            OriginalRequest::Withdraw(e) => &e.envelope,
            OriginalRequest::Transfer(e) => &e.envelope,
        }
    }
}

event_struct!(CurrencyConversionRequested {
    original_request: OriginalRequest,
    target_currency: String,
    // Only set for a transfer: the to-leg's transaction id, which the
    // single `envelope.transaction_id` slot (holding the from-leg) can't
    // also carry. The external conversion service echoes it back on
    // `Transfer.CurrencyConverted`.
    to_transaction_id: Option<TransactionId>,
});

event_struct!(CurrencyConverted {
    original_request: OriginalRequest,
    original_amount: Money,
    converted_amount: Money,
    rate: Decimal,
});

event_struct!(DepositCurrencyConverted {
    original_request: OriginalRequest,
    converted: CurrencyConverted,
});

event_struct!(WithdrawCurrencyConverted {
    original_request: OriginalRequest,
    converted: CurrencyConverted,
});

/// Transfer's flow-wrapped counterpart to `DepositCurrencyConverted` /
/// `WithdrawCurrencyConverted`. A transfer has two legs and needs both
/// transaction ids back, which the single `envelope.transaction_id` slot
/// can't carry on its own.
event_struct!(TransferCurrencyConverted {
    original_request: OriginalRequest,
    converted: CurrencyConverted,
    from_transaction_id: TransactionId,
    to_transaction_id: TransactionId,
});

event_struct!(PaymentInitiated { amount: Money });
event_struct!(PaymentProcessed {
    payment_id: Option<PaymentId>,
    // Only present when the provider's webhook carries it, which is the
    // only case that matters: a transaction_id/payment_id miss with no
    // amount to fall back on can't be upserted and is skipped instead.
    amount: Option<Money>,
});
event_struct!(PaymentCompleted {
    payment_id: Option<PaymentId>,
    amount: Money,
    fee: Option<Money>,
});
event_struct!(PaymentFailed {
    payment_id: Option<PaymentId>,
    reason: String,
});

event_struct!(FeesCalculated { fee: Money });

/// Tagged union of every event variant the bus can deliver. Registration is
/// type-driven: a handler only ever receives the variant it subscribed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    DepositRequested(DepositRequested),
    DepositValidated(DepositValidated),
    DepositPersisted(DepositPersisted),
    DepositFailed(DepositFailed),

    WithdrawRequested(WithdrawRequested),
    WithdrawValidated(WithdrawValidated),
    WithdrawPersisted(WithdrawPersisted),
    WithdrawFailed(WithdrawFailed),

    TransferRequested(TransferRequested),
    TransferValidated(TransferValidated),
    TransferPersisted(TransferPersisted),
    TransferFailed(TransferFailed),

    CurrencyConversionRequested(CurrencyConversionRequested),
    CurrencyConverted(CurrencyConverted),
    DepositCurrencyConverted(DepositCurrencyConverted),
    WithdrawCurrencyConverted(WithdrawCurrencyConverted),
    TransferCurrencyConverted(TransferCurrencyConverted),

    PaymentInitiated(PaymentInitiated),
    PaymentProcessed(PaymentProcessed),
    PaymentCompleted(PaymentCompleted),
    PaymentFailed(PaymentFailed),

    FeesCalculated(FeesCalculated),
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::DepositRequested(_) => "Deposit.Requested",
            DomainEvent::DepositValidated(_) => "Deposit.Validated",
            DomainEvent::DepositPersisted(_) => "Deposit.Persisted",
            DomainEvent::DepositFailed(_) => "Deposit.Failed",

            DomainEvent::WithdrawRequested(_) => "Withdraw.Requested",
            DomainEvent::WithdrawValidated(_) => "Withdraw.Validated",
            DomainEvent::WithdrawPersisted(_) => "Withdraw.Persisted",
            DomainEvent::WithdrawFailed(_) => "Withdraw.Failed",

            DomainEvent::TransferRequested(_) => "Transfer.Requested",
            DomainEvent::TransferValidated(_) => "Transfer.Validated",
            DomainEvent::TransferPersisted(_) => "Transfer.Persisted",
            DomainEvent::TransferFailed(_) => "Transfer.Failed",

            DomainEvent::CurrencyConversionRequested(_) => "CurrencyConversion.Requested",
            DomainEvent::CurrencyConverted(_) => "CurrencyConversion.Converted",
            DomainEvent::DepositCurrencyConverted(_) => "Deposit.CurrencyConverted",
            DomainEvent::WithdrawCurrencyConverted(_) => "Withdraw.CurrencyConverted",
            DomainEvent::TransferCurrencyConverted(_) => "Transfer.CurrencyConverted",

            DomainEvent::PaymentInitiated(_) => "Payment.Initiated",
            DomainEvent::PaymentProcessed(_) => "Payment.Processed",
            DomainEvent::PaymentCompleted(_) => "Payment.Completed",
            DomainEvent::PaymentFailed(_) => "Payment.Failed",

            DomainEvent::FeesCalculated(_) => "Fees.Calculated",
        }
    }

    pub fn envelope(&self) -> &Envelope {
        match self {
            DomainEvent::DepositRequested(e) => &e.envelope,
            DomainEvent::DepositValidated(e) => &e.envelope,
            DomainEvent::DepositPersisted(e) => &e.envelope,
            DomainEvent::DepositFailed(e) => &e.envelope,

            DomainEvent::WithdrawRequested(e) => &e.envelope,
            DomainEvent::WithdrawValidated(e) => &e.envelope,
            DomainEvent::WithdrawPersisted(e) => &e.envelope,
            DomainEvent::WithdrawFailed(e) => &e.envelope,

            DomainEvent::TransferRequested(e) => &e.envelope,
            DomainEvent::TransferValidated(e) => &e.envelope,
            DomainEvent::TransferPersisted(e) => &e.envelope,
            DomainEvent::TransferFailed(e) => &e.envelope,

            DomainEvent::CurrencyConversionRequested(e) => &e.envelope,
            DomainEvent::CurrencyConverted(e) => &e.envelope,
            DomainEvent::DepositCurrencyConverted(e) => &e.envelope,
            DomainEvent::WithdrawCurrencyConverted(e) => &e.envelope,
            DomainEvent::TransferCurrencyConverted(e) => &e.envelope,

            DomainEvent::PaymentInitiated(e) => &e.envelope,
            DomainEvent::PaymentProcessed(e) => &e.envelope,
            DomainEvent::PaymentCompleted(e) => &e.envelope,
            DomainEvent::PaymentFailed(e) => &e.envelope,

            DomainEvent::FeesCalculated(e) => &e.envelope,
        }
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.envelope().correlation_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_envelope_preserves_correlation_id() {
        let root = Envelope::root(FlowType::Deposit, UserId::new(), AccountId::new());
        let child = root.next();
        assert_eq!(root.correlation_id, child.correlation_id);
        assert_ne!(root.id.0, child.id.0);
    }

    #[test]
    fn event_type_is_stable_per_variant() {
        let envelope = Envelope::root(FlowType::Deposit, UserId::new(), AccountId::new());
        let event = DomainEvent::DepositFailed(DepositFailed {
            envelope,
            reason: "bad input".to_string(),
        });
        assert_eq!(event.event_type(), "Deposit.Failed");
    }
}
