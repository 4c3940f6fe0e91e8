use crate::contracts::repository::TransactionRepository;
use crate::entities::Transaction;
use crate::error::CoreError;
use common::ids::{PaymentId, TransactionId};
use std::sync::Arc;

/// Looks a transaction up by whichever identifier the caller has on hand:
/// the `transaction_id` carried through an in-flow event, or the
/// `payment_id` an asynchronous provider webhook supplies instead. Tries
/// `transaction_id` first since it's the cheaper, already-indexed path.
pub async fn find_transaction_by_payment_or_id(
    transactions: &Arc<dyn TransactionRepository>,
    transaction_id: Option<TransactionId>,
    payment_id: Option<PaymentId>,
) -> Result<Transaction, CoreError> {
    if let Some(id) = transaction_id {
        if let Some(tx) = transactions.get(id).await? {
            return Ok(tx);
        }
    }
    if let Some(payment_id) = payment_id {
        if let Some(tx) = transactions.get_by_payment_id(payment_id).await? {
            return Ok(tx);
        }
    }
    Err(CoreError::NotFound(format!(
        "transaction by id {transaction_id:?} or payment id {payment_id:?}"
    )))
}

/// Unwraps a value a handler expects an earlier stage to have populated.
/// A miss here means the event reached a stage it couldn't legitimately
/// reach without that value being set, i.e. a wiring bug rather than
/// something a caller could have triggered.
pub fn require<T>(value: Option<T>, what: &str) -> Result<T, CoreError> {
    value.ok_or_else(|| CoreError::ProgrammerError(format!("expected {what} to be set")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_turns_none_into_programmer_error() {
        let result: Result<u8, CoreError> = require(None, "payment id");
        assert!(matches!(result, Err(CoreError::ProgrammerError(_))));
    }

    #[test]
    fn require_passes_through_some() {
        assert_eq!(require(Some(5u8), "amount").unwrap(), 5);
    }
}
