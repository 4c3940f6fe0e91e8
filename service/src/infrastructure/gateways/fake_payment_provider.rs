use async_trait::async_trait;
use common::ids::PaymentId;
use dashmap::DashMap;
use txn_core::context::Context;
use txn_core::contracts::payment_provider::{
    InitiatePaymentRequest, InitiatePaymentResult, InitiatePayoutRequest, InitiatePayoutResult,
    PaymentProvider, PaymentStatus,
};
use txn_core::error::CoreError;

/// Always-succeeds payment processor for local development and the test
/// suite, standing in for the real HTTP-backed collaborator until one is
/// wired up.
#[derive(Default)]
pub struct FakePaymentProvider {
    statuses: DashMap<PaymentId, PaymentStatus>,
}

impl FakePaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentProvider for FakePaymentProvider {
    async fn initiate_payment(
        &self,
        _ctx: &Context,
        _request: InitiatePaymentRequest,
    ) -> Result<InitiatePaymentResult, CoreError> {
        let payment_id = PaymentId::new();
        self.statuses.insert(payment_id, PaymentStatus::Succeeded);
        Ok(InitiatePaymentResult {
            payment_id,
            status: PaymentStatus::Succeeded,
        })
    }

    async fn initiate_payout(
        &self,
        _ctx: &Context,
        request: InitiatePayoutRequest,
    ) -> Result<InitiatePayoutResult, CoreError> {
        let payout_id = PaymentId::new();
        self.statuses.insert(payout_id, PaymentStatus::Pending);
        Ok(InitiatePayoutResult {
            payout_id,
            payment_provider_id: format!(
                "po_fake_{}_{}",
                payout_id.as_uuid(),
                request.destination.account_number
            ),
            status: PaymentStatus::Pending,
            fee_amount: None,
            estimated_arrival_date: None,
        })
    }

    async fn get_payment_status(
        &self,
        _ctx: &Context,
        payment_id: PaymentId,
    ) -> Result<PaymentStatus, CoreError> {
        self.statuses
            .get(&payment_id)
            .map(|s| *s)
            .ok_or_else(|| CoreError::NotFound(format!("payment {payment_id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ids::{AccountId, TransactionId, UserId};
    use common::money::Money;
    use std::collections::HashMap;
    use txn_core::contracts::payment_provider::BankAccountDestination;

    #[tokio::test]
    async fn initiate_payment_always_succeeds() {
        let provider = FakePaymentProvider::new();
        let result = provider
            .initiate_payment(
                &Context::new(),
                InitiatePaymentRequest {
                    user_id: UserId::new(),
                    account_id: AccountId::new(),
                    amount: Money::from_minor(1_000, "USD").unwrap(),
                    transaction_id: TransactionId::new(),
                },
            )
            .await
            .unwrap();
        assert_eq!(result.status, PaymentStatus::Succeeded);

        let status = provider
            .get_payment_status(&Context::new(), result.payment_id)
            .await
            .unwrap();
        assert_eq!(status, PaymentStatus::Succeeded);
    }

    #[tokio::test]
    async fn unknown_payment_status_is_not_found() {
        let provider = FakePaymentProvider::new();
        let err = provider
            .get_payment_status(&Context::new(), PaymentId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn initiate_payout_starts_pending() {
        let provider = FakePaymentProvider::new();
        let result = provider
            .initiate_payout(
                &Context::new(),
                InitiatePayoutRequest {
                    user_id: UserId::new(),
                    account_id: AccountId::new(),
                    provider_connect_account_id: "acct_1".to_string(),
                    transaction_id: TransactionId::new(),
                    amount: Money::from_minor(5_000, "USD").unwrap(),
                    description: "payout".to_string(),
                    metadata: HashMap::new(),
                    destination: BankAccountDestination {
                        account_number: "0001".to_string(),
                        routing_number: "110000000".to_string(),
                    },
                },
            )
            .await
            .unwrap();
        assert_eq!(result.status, PaymentStatus::Pending);
        assert!(result.payment_provider_id.ends_with("0001"));
    }
}
